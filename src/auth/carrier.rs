//! Trust artifacts carried between client and server
//!
//! Every artifact has two carriers: an explicit request header, set by the
//! Mini App's fetch wrapper, and an HttpOnly cookie, set by the
//! authentication endpoint for navigations that cannot add headers. Headers
//! take precedence.

use super::bearer::credential_from_headers;
use super::session::SESSION_TTL_SECS;
use hyper::HeaderMap;
use hyper::header::COOKIE;

pub const TELEGRAM_ID_HEADER: &str = "x-telegram-id";
pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

pub const TELEGRAM_ID_COOKIE: &str = "telegram_id";
pub const INIT_DATA_COOKIE: &str = "telegram_init_data";
pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

const COOKIE_ATTRIBUTES: &str = "HttpOnly; Secure; SameSite=None; Path=/";

/// Where the identity reference was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Header,
    Cookie,
}

/// Header and cookie name two different identities
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identity header and cookie disagree")]
pub struct IdentityConflict {
    pub header: String,
    pub cookie: String,
}

/// Unverified artifacts presented with one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustArtifacts {
    pub telegram_id: Option<String>,
    pub identity_source: Option<IdentitySource>,
    pub credential: Option<String>,
    pub launch_payload: Option<String>,
}

impl TrustArtifacts {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, IdentityConflict> {
        let header_id = header_value(headers, TELEGRAM_ID_HEADER);
        let cookie_id = cookie_value(headers, TELEGRAM_ID_COOKIE);

        let (telegram_id, identity_source) = match (header_id, cookie_id) {
            (Some(header), Some(cookie)) if header != cookie => {
                return Err(IdentityConflict { header, cookie });
            }
            (Some(header), _) => (Some(header), Some(IdentitySource::Header)),
            (None, Some(cookie)) => (Some(cookie), Some(IdentitySource::Cookie)),
            (None, None) => (None, None),
        };

        let credential =
            credential_from_headers(headers).or_else(|| cookie_value(headers, AUTH_TOKEN_COOKIE));
        let launch_payload = header_value(headers, INIT_DATA_HEADER)
            .or_else(|| cookie_value(headers, INIT_DATA_COOKIE));

        Ok(Self {
            telegram_id,
            identity_source,
            credential,
            launch_payload,
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Decoded value of the first cookie named `name`.
///
/// Cookies are written percent-encoded; a value that fails to decode is
/// returned verbatim.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| {
            let value = value.trim().trim_matches('"');
            urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string())
        })
        .filter(|v| !v.is_empty())
}

fn set_cookie(name: &str, value: &str, max_age: i64) -> String {
    format!(
        "{name}={}; {COOKIE_ATTRIBUTES}; Max-Age={max_age}",
        urlencoding::encode(value)
    )
}

/// `Set-Cookie` values issued after a successful authentication
pub fn session_cookies(telegram_id: &str, credential: &str, launch_payload: Option<&str>) -> Vec<String> {
    let mut cookies = vec![set_cookie(TELEGRAM_ID_COOKIE, telegram_id, SESSION_TTL_SECS)];
    if let Some(payload) = launch_payload {
        cookies.push(set_cookie(INIT_DATA_COOKIE, payload, SESSION_TTL_SECS));
    }
    cookies.push(set_cookie(AUTH_TOKEN_COOKIE, credential, SESSION_TTL_SECS));
    cookies
}

/// `Set-Cookie` values that expire every trust cookie
pub fn clear_cookies() -> Vec<String> {
    [TELEGRAM_ID_COOKIE, INIT_DATA_COOKIE, AUTH_TOKEN_COOKIE]
        .iter()
        .map(|name| set_cookie(name, "", 0))
        .collect()
}
