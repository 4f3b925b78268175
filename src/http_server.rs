use crate::auth::{LaunchVerifier, SessionIssuer};
use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult};
use crate::gate::{
    self, AuthorizationGate, DenyReason, GateOutcome, IdentityProof, Principal, RouteKind,
};
use crate::guard::EndpointGuard;
use crate::handlers;
use crate::identity::IdentityResolver;
use crate::store::AccountStore;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, LOCATION, SET_COOKIE,
};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

// DoS protection
pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024; // 1MB
const MAX_CONNECTIONS: usize = 100;
const CONNECTION_TIMEOUT_SECS: u64 = 30;

pub const USER_ID_HINT_HEADER: &str = "x-user-id";
pub const USER_ADMIN_HINT_HEADER: &str = "x-user-admin";

type BoxError = Box<dyn StdError + Send + Sync>;

/// Everything a request handler needs, built once at startup
#[derive(Debug)]
pub struct AppState {
    pub config: AppConfig,
    pub resolver: IdentityResolver,
    pub sessions: Arc<SessionIssuer>,
    pub launch: LaunchVerifier,
    pub gate: AuthorizationGate,
    pub guard: EndpointGuard,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn AccountStore>) -> Self {
        let resolver = IdentityResolver::new(store, config.bootstrap_admin_id.clone());
        let sessions = Arc::new(SessionIssuer::new(&config.session_secret));
        let launch = LaunchVerifier::from_config(&config);
        let proof = IdentityProof::new(Arc::clone(&sessions), launch.clone(), config.environment);
        Self {
            gate: AuthorizationGate::new(resolver.clone(), proof.clone()),
            guard: EndpointGuard::new(resolver.clone(), proof),
            resolver,
            sessions,
            launch,
            config,
        }
    }
}

/// Connection guard for automatic connection count management
struct ConnectionGuard {
    connection_count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn new(connection_count: Arc<AtomicUsize>) -> Self {
        Self { connection_count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connection_count.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct HttpServer {
    state: Arc<AppState>,
    connection_count: Arc<AtomicUsize>,
}

impl HttpServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind `addr` and serve in a background task. Returns the bound address.
    pub async fn start(self, addr: SocketAddr) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "HTTP server listening");

        tokio::spawn(async move {
            loop {
                let stream = match listener.accept().await {
                    Ok((stream, _peer)) => stream,
                    Err(err) => {
                        warn!(error = %err, "error accepting connection");
                        continue;
                    }
                };

                if self.connection_count.load(Ordering::Relaxed) >= MAX_CONNECTIONS {
                    warn!(limit = MAX_CONNECTIONS, "connection limit reached, rejecting connection");
                    continue;
                }
                self.connection_count.fetch_add(1, Ordering::Relaxed);
                let conn_count = Arc::clone(&self.connection_count);
                let state = Arc::clone(&self.state);
                let io = TokioIo::new(stream);

                tokio::spawn(async move {
                    let _guard = ConnectionGuard::new(conn_count);
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, Infallible>(route(&state, req).await) }
                    });
                    let connection =
                        hyper::server::conn::http1::Builder::new().serve_connection(io, service);

                    match tokio::time::timeout(
                        Duration::from_secs(CONNECTION_TIMEOUT_SECS),
                        connection,
                    )
                    .await
                    {
                        Ok(Err(err)) => debug!(error = ?err, "error serving connection"),
                        Ok(Ok(())) => {}
                        Err(_) => debug!(
                            timeout_secs = CONNECTION_TIMEOUT_SECS,
                            "connection timed out"
                        ),
                    }
                });
            }
        });

        Ok(local_addr)
    }
}

/// Route one request. Never fails: every error becomes a response.
pub async fn route<B>(state: &AppState, mut req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(method = %method, path = %path, "HTTP request");

    if method == Method::OPTIONS {
        return cors_preflight();
    }
    if method == Method::GET && path == "/health" {
        return health_check();
    }

    let mut principal = None;
    if let Some(requirement) = gate::classify(&path) {
        let outcome = state.gate.evaluate(req.headers(), requirement).await;
        match outcome {
            Ok(GateOutcome::Allow(allowed)) => {
                req.extensions_mut().insert(allowed.clone());
                principal = Some(allowed);
            }
            Ok(GateOutcome::Anonymous) => {}
            Ok(GateOutcome::Deny(reason)) => return denial(requirement.kind, reason),
            Err(err) => return ApiError::from(err).into_response(),
        }
    }

    let mut response = match dispatch(state, &method, &path, req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    if let Some(principal) = principal {
        attach_hints(&mut response, &principal);
    }
    response
}

async fn dispatch<B>(
    state: &AppState,
    method: &Method,
    path: &str,
    req: Request<B>,
) -> ApiResult<Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    match (method, path) {
        (&Method::GET, "/") => Ok(handlers::landing_page()),
        (&Method::POST, "/api/auth/telegram") => handlers::authenticate(state, req).await,
        (&Method::GET, "/api/auth/me") => handlers::current_user(state, req.headers()).await,
        (&Method::POST, "/api/auth/logout") => Ok(handlers::logout()),
        (&Method::GET, "/api/auth/debug") => handlers::auth_debug(state, req.headers()),
        (&Method::GET, "/api/admin/users") => {
            let query = query_params(req.uri().query());
            handlers::list_users(state, req.headers(), &query).await
        }
        (&Method::POST, p) if p.starts_with("/api/admin/users/") => match block_target(p) {
            Some(target) => handlers::set_user_blocked(state, target, req).await,
            None => Err(ApiError::NotFound(format!("{method} {path}"))),
        },
        (&Method::GET, p) if p.starts_with(gate::ADMIN_PAGE_PREFIX) => {
            Ok(handlers::admin_page(req.extensions().get::<Principal>()))
        }
        _ => Err(ApiError::NotFound(format!("{method} {path}"))),
    }
}

/// `{id}` of `/api/admin/users/{id}/block`
fn block_target(path: &str) -> Option<&str> {
    path.strip_prefix("/api/admin/users/")?
        .strip_suffix("/block")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

fn denial(kind: RouteKind, reason: DenyReason) -> Response<Full<Bytes>> {
    match kind {
        RouteKind::Page => redirect("/"),
        RouteKind::Api => reason.to_api_error().into_response(),
    }
}

fn attach_hints(response: &mut Response<Full<Bytes>>, principal: &Principal) {
    let headers = response.headers_mut();
    headers.insert(USER_ID_HINT_HEADER, HeaderValue::from(principal.account_id));
    headers.insert(
        USER_ADMIN_HINT_HEADER,
        HeaderValue::from_static(if principal.is_admin { "true" } else { "false" }),
    );
}

/// Collect a request body, refusing anything over [`MAX_REQUEST_BODY_SIZE`]
pub async fn read_body<B>(req: Request<B>) -> ApiResult<Bytes>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_REQUEST_BODY_SIZE) {
        return Err(ApiError::PayloadTooLarge {
            limit: MAX_REQUEST_BODY_SIZE,
        });
    }

    match Limited::new(req.into_body(), MAX_REQUEST_BODY_SIZE).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ApiError::PayloadTooLarge {
                limit: MAX_REQUEST_BODY_SIZE,
            })
        }
        Err(err) => {
            debug!(error = %err, "failed to read request body");
            Err(ApiError::BadRequest("Failed to read request body".to_string()))
        }
    }
}

/// Decode a query string into `(key, value)` pairs
pub fn query_params(query: Option<&str>) -> Vec<(String, String)> {
    query
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| {
            let decoded_key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
            let decoded_value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
            (decoded_key.into_owned(), decoded_value.into_owned())
        })
        .collect()
}

fn response_with(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    response_with(status, "application/json", Bytes::from(body.to_string()))
}

pub fn html_response(status: StatusCode, html: String) -> Response<Full<Bytes>> {
    response_with(status, "text/html; charset=utf-8", Bytes::from(html))
}

pub fn redirect(location: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::FOUND;
    response
        .headers_mut()
        .insert(LOCATION, HeaderValue::from_static(location));
    response
}

pub fn append_cookies(response: &mut Response<Full<Bytes>>, cookies: Vec<String>) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(err) => error!(error = %err, "unencodable Set-Cookie value dropped"),
        }
    }
}

pub fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Handle CORS preflight requests
fn cors_preflight() -> Response<Full<Bytes>> {
    let mut response = response_with(StatusCode::OK, "text/plain", Bytes::new());
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(
            "Content-Type, Authorization, X-Telegram-Id, X-Auth-Token, X-Telegram-Init-Data",
        ),
    );
    response
}

fn health_check() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({"status": "healthy", "service": env!("CARGO_PKG_NAME")}),
    )
}
