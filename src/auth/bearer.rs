//! Credential extraction from request headers
//!
//! Session credentials travel either in the dedicated `x-auth-token` header
//! or as an RFC 6750 Bearer token in `Authorization`. The dedicated header
//! wins when both are present.

use hyper::HeaderMap;

pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

const BEARER_PREFIX: &str = "bearer ";

/// Extract bearer token from an Authorization header value
///
/// The scheme is matched case-insensitively; an empty token is treated as
/// absent.
///
/// # Examples
/// ```
/// use kb_miniapp::auth::bearer::extract_bearer_token;
///
/// assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
/// assert_eq!(extract_bearer_token("bearer lowercase"), Some("lowercase"));
/// assert_eq!(extract_bearer_token("Bearer "), None);
/// assert_eq!(extract_bearer_token("Basic auth"), None);
/// ```
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    let scheme = auth_header.get(..BEARER_PREFIX.len())?;
    if !scheme.eq_ignore_ascii_case(BEARER_PREFIX) {
        return None;
    }
    let token = auth_header[BEARER_PREFIX.len()..].trim();
    if token.is_empty() { None } else { Some(token) }
}

/// The session credential presented with a request, if any
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    let dedicated = headers
        .get(AUTH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(token) = dedicated {
        return Some(token.to_string());
    }

    headers
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .map(str::to_string)
}
