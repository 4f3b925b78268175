#![allow(dead_code)]

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Response};
use kb_miniapp::auth::{now_unix, signature};
use kb_miniapp::config::{AppConfig, Environment};
use kb_miniapp::http_server::{AppState, route};
use kb_miniapp::store::{AccountStore, MemoryAccountStore};
use serde_json::Value;
use std::sync::Arc;

pub const BOT_TOKEN: &str = "7000000001:AAE-integration-test-bot-token";
pub const SESSION_SECRET: &str = "integration-test-session-secret";
pub const ADMIN_ID: &str = "999";

pub fn config(environment: Environment) -> AppConfig {
    AppConfig::from_lookup(|name| {
        let value = match name {
            "APP_ENV" => environment.as_str(),
            "TELEGRAM_BOT_TOKEN" => BOT_TOKEN,
            "JWT_SECRET" => SESSION_SECRET,
            "ADMIN_TELEGRAM_ID" => ADMIN_ID,
            "BIND_ADDR" => "127.0.0.1:0",
            _ => return None,
        };
        Some(value.to_string())
    })
    .expect("test configuration is valid")
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<dyn AccountStore>,
}

impl TestApp {
    pub fn new(environment: Environment) -> Self {
        let store: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new());
        Self {
            state: AppState::new(config(environment), Arc::clone(&store)),
            store,
        }
    }

    pub async fn send(&self, req: Request<Full<Bytes>>) -> Response<Full<Bytes>> {
        route(&self.state, req).await
    }

    /// POST a login and return the response
    pub async fn login(&self, body: Value) -> Response<Full<Bytes>> {
        self.send(json_request(Method::POST, "/api/auth/telegram", &body, &[]))
            .await
    }
}

/// Telegram user JSON as the client embeds it in `user=`
pub fn user_json(id: i64, first_name: &str) -> String {
    serde_json::json!({
        "id": id,
        "first_name": first_name,
        "username": format!("user{id}"),
        "language_code": "en",
    })
    .to_string()
}

/// A signed Mini App payload for `user_json`, issued at `auth_date`
pub fn signed_payload(user_json: &str, auth_date: i64) -> String {
    let unsigned = format!(
        "query_id=AAHdF6IQAAAAAN0XohDhrOrc&user={}&auth_date={auth_date}",
        urlencoding::encode(user_json)
    );
    let hash = signature::sign(&unsigned, BOT_TOKEN).expect("fixture payload signs");
    format!("{unsigned}&hash={hash}")
}

pub fn fresh_payload(id: i64, first_name: &str) -> String {
    signed_payload(&user_json(id, first_name), now_unix())
}

pub fn json_request(
    method: Method,
    uri: &str,
    body: &Value,
    headers: &[(&str, &str)],
) -> Request<Full<Bytes>> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("valid request")
}

pub fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Full<Bytes>> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Full::new(Bytes::new())).expect("valid request")
}

pub async fn body_json(response: Response<Full<Bytes>>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

pub fn set_cookies(response: &Response<Full<Bytes>>) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

pub async fn body_json_incoming(response: Response<hyper::body::Incoming>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}
