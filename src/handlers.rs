//! Endpoint handlers
//!
//! Handlers return [`ApiResult`]; the router turns errors into JSON bodies.

use crate::auth::carrier::{self, IdentitySource, TrustArtifacts};
use crate::auth::create_safe_token_preview;
use crate::error::{ApiError, ApiResult};
use crate::gate::Principal;
use crate::http_server::{
    AppState, append_cookies, html_escape, html_response, json_response, read_body,
};
use crate::identity::IdentityClaim;
use crate::store::{Account, ProfileUpdate};
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::{HeaderMap, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_PAGE_LIMIT: u32 = 10;
const MAX_PAGE_LIMIT: u32 = 100;

const INVALID_TELEGRAM_DATA: &str = "Invalid Telegram data";

/// Public view of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    pub id: i64,
    pub telegram_id: String,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub is_blocked: bool,
}

impl From<&Account> for UserView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            telegram_id: account.telegram_id.clone(),
            username: account.username.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            avatar_url: account.avatar_url.clone(),
            is_admin: account.is_admin,
            is_blocked: account.is_blocked,
        }
    }
}

/// Body user id, sent as a number by the Telegram SDK and as a string by
/// some wrappers
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum UserId {
    Number(i64),
    Text(String),
}

impl UserId {
    fn normalized(&self) -> Option<String> {
        match self {
            UserId::Number(n) => Some(n.to_string()),
            UserId::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BodyUser {
    #[serde(default)]
    id: Option<UserId>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
}

impl BodyUser {
    fn telegram_id(&self) -> Option<String> {
        self.id.as_ref().and_then(UserId::normalized)
    }

    fn into_claim(self) -> Option<IdentityClaim> {
        Some(IdentityClaim {
            telegram_id: self.telegram_id()?,
            profile: ProfileUpdate {
                username: self.username,
                first_name: self.first_name.unwrap_or_default(),
                last_name: self.last_name,
                avatar_url: self.photo_url,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct AuthRequest {
    #[serde(rename = "initData", default)]
    init_data: Option<String>,
    #[serde(default)]
    user: Option<BodyUser>,
}

/// `POST /api/auth/telegram`
pub async fn authenticate<B>(state: &AppState, req: Request<B>) -> ApiResult<Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = read_body(req).await?;
    let request: AuthRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid JSON in request body".to_string()))?;

    let init_data = request
        .init_data
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty());
    let environment = state.config.environment;

    let claim = match init_data {
        Some(raw) => {
            let claim = state.launch.check(raw).map_err(|rejection| {
                warn!(
                    reason = %rejection,
                    payload = %create_safe_token_preview(raw),
                    "launch payload rejected"
                );
                ApiError::AuthenticationFailed(INVALID_TELEGRAM_DATA.to_string())
            })?;
            let body_id = request.user.as_ref().and_then(BodyUser::telegram_id);
            if body_id.is_some_and(|id| id != claim.telegram_id) {
                warn!(telegram_id = %claim.telegram_id, "body user id disagrees with signed payload");
                return Err(ApiError::AuthenticationFailed(
                    INVALID_TELEGRAM_DATA.to_string(),
                ));
            }
            claim
        }
        None if environment.may_skip_launch_verification(false) => {
            let user = request
                .user
                .ok_or_else(|| ApiError::BadRequest("User data is required".to_string()))?;
            let claim = user
                .into_claim()
                .ok_or_else(|| ApiError::BadRequest("User id is required".to_string()))?;
            warn!(
                telegram_id = %claim.telegram_id,
                environment = %environment,
                "accepting unsigned identity claim"
            );
            claim
        }
        None => {
            return Err(ApiError::AuthenticationFailed(
                "Telegram init data is required".to_string(),
            ));
        }
    };

    let account = state.resolver.resolve(&claim).await?;
    if account.is_blocked {
        info!(telegram_id = %account.telegram_id, "blocked account refused at login");
        return Err(ApiError::AccountBlocked);
    }

    let token = state.sessions.issue(&account)?;
    info!(
        telegram_id = %account.telegram_id,
        account_id = account.id,
        verified = init_data.is_some(),
        "session issued"
    );

    let mut response = json_response(
        StatusCode::OK,
        &json!({"user": UserView::from(&account), "token": token}),
    );
    append_cookies(
        &mut response,
        carrier::session_cookies(&account.telegram_id, &token, init_data),
    );
    Ok(response)
}

/// `GET /api/auth/me`
pub async fn current_user(state: &AppState, headers: &HeaderMap) -> ApiResult<Response<Full<Bytes>>> {
    let account = state.guard.current_account(headers).await?;
    Ok(json_response(
        StatusCode::OK,
        &json!({"user": UserView::from(&account)}),
    ))
}

/// `POST /api/auth/logout`
pub fn logout() -> Response<Full<Bytes>> {
    let mut response = json_response(StatusCode::OK, &json!({"success": true}));
    append_cookies(&mut response, carrier::clear_cookies());
    response
}

/// `GET /api/auth/debug`, development only
pub fn auth_debug(state: &AppState, headers: &HeaderMap) -> ApiResult<Response<Full<Bytes>>> {
    let environment = state.config.environment;
    if !environment.is_relaxed() {
        return Err(ApiError::NotFound("GET /api/auth/debug".to_string()));
    }

    let report = match TrustArtifacts::from_headers(headers) {
        Ok(artifacts) => {
            let credential_valid = artifacts
                .credential
                .as_deref()
                .map(|token| state.sessions.verify(token).is_some());
            json!({
                "environment": environment.as_str(),
                "identity_conflict": false,
                "telegram_id": artifacts.telegram_id,
                "identity_source": artifacts.identity_source.map(|source| match source {
                    IdentitySource::Header => "header",
                    IdentitySource::Cookie => "cookie",
                }),
                "credential_present": artifacts.credential.is_some(),
                "credential_valid": credential_valid,
                "launch_payload_present": artifacts.launch_payload.is_some(),
            })
        }
        Err(_) => json!({
            "environment": environment.as_str(),
            "identity_conflict": true,
        }),
    };
    Ok(json_response(StatusCode::OK, &report))
}

fn parse_param(query: &[(String, String)], name: &str) -> Option<u32> {
    query
        .iter()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| value.trim().parse::<u32>().ok())
}

/// `GET /api/admin/users?page&limit`
pub async fn list_users(
    state: &AppState,
    headers: &HeaderMap,
    query: &[(String, String)],
) -> ApiResult<Response<Full<Bytes>>> {
    state.guard.require_admin(headers).await?;

    let page = parse_param(query, "page").unwrap_or(DEFAULT_PAGE).max(1);
    let limit = parse_param(query, "limit")
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);

    let (users, total) = state.resolver.store().list_page(page, limit).await?;
    let total_pages = total.div_ceil(u64::from(limit));
    Ok(json_response(
        StatusCode::OK,
        &json!({
            "users": users,
            "pagination": {
                "page": page,
                "limit": limit,
                "total": total,
                "totalPages": total_pages,
            },
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct BlockRequest {
    #[serde(rename = "isBlocked")]
    is_blocked: bool,
}

/// `POST /api/admin/users/{id}/block`
pub async fn set_user_blocked<B>(
    state: &AppState,
    target: &str,
    req: Request<B>,
) -> ApiResult<Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let admin = state.guard.require_admin(req.headers()).await?;
    let id = target
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid user id '{target}'")))?;

    let body = read_body(req).await?;
    let request: BlockRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Expected {\"isBlocked\": bool}".to_string()))?;

    let updated = state
        .resolver
        .store()
        .set_blocked(id, request.is_blocked)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {id}")))?;
    info!(
        admin = %admin.telegram_id,
        account_id = updated.id,
        is_blocked = updated.is_blocked,
        "account block state changed"
    );
    Ok(json_response(StatusCode::OK, &json!(updated)))
}

/// `GET /`
pub fn landing_page() -> Response<Full<Bytes>> {
    html_response(
        StatusCode::OK,
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Knowledge Base</title>
    <script src="https://telegram.org/js/telegram-web-app.js"></script>
</head>
<body>
    <h1>Knowledge Base</h1>
    <p>Open this page from the Telegram bot to sign in.</p>
</body>
</html>"#
            .to_string(),
    )
}

/// `GET /admin...`, shown only after the gate allowed the request
pub fn admin_page(principal: Option<&Principal>) -> Response<Full<Bytes>> {
    let who = principal
        .map(|p| html_escape(&p.telegram_id))
        .unwrap_or_else(|| "anonymous".to_string());
    html_response(
        StatusCode::OK,
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <title>Knowledge Base Admin</title>
</head>
<body>
    <h1>Administration</h1>
    <p>Signed in as {who}</p>
    <div id="users"></div>
</body>
</html>"#
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_user_ids() {
        let numeric: BodyUser = serde_json::from_str(r#"{"id":111,"first_name":"Ann"}"#).unwrap();
        assert_eq!(numeric.telegram_id().as_deref(), Some("111"));

        let text: BodyUser = serde_json::from_str(r#"{"id":" 222 "}"#).unwrap();
        assert_eq!(text.telegram_id().as_deref(), Some("222"));

        let missing: BodyUser = serde_json::from_str(r#"{"first_name":"Ann"}"#).unwrap();
        assert!(missing.into_claim().is_none());
    }

    #[test]
    fn test_auth_request_shape() {
        let request: AuthRequest =
            serde_json::from_str(r#"{"initData":"a=1&hash=ff","user":{"id":1}}"#).unwrap();
        assert_eq!(request.init_data.as_deref(), Some("a=1&hash=ff"));
        assert!(request.user.is_some());

        let empty: AuthRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.init_data.is_none());
    }

    #[test]
    fn test_parse_param() {
        let query = vec![
            ("page".to_string(), "3".to_string()),
            ("limit".to_string(), "abc".to_string()),
        ];
        assert_eq!(parse_param(&query, "page"), Some(3));
        assert_eq!(parse_param(&query, "limit"), None);
        assert_eq!(parse_param(&query, "missing"), None);
    }

    #[tokio::test]
    async fn test_admin_page_escapes_identity() {
        use http_body_util::BodyExt;

        let principal = Principal {
            account_id: 1,
            telegram_id: "<b>1</b>".to_string(),
            is_admin: true,
        };
        let response = admin_page(Some(&principal));
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("&lt;b&gt;1&lt;/b&gt;"));
        assert!(!html.contains("<b>1</b>"));
    }
}
