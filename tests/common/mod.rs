#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
};
use blog_gate::{
    App, ServerConfig,
    cli::{ClientIpHeader, IpExtractor},
    create_app,
    db::MemoryUserStore,
};
use tower::ServiceExt;

pub const SECRET: &[u8] = b"integration-test-secret-at-least-32-bytes";
pub const APP_NAME: &str = "awesome-blog";
pub const CLIENT_IP: &str = "203.0.113.7";
pub const USER_AGENT: &str = "integration-agent/1.0";
pub const DEVICE: &str = "device-1";

/// Config reading the client address from X-Forwarded-For.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::new(APP_NAME, SECRET.to_vec(), Arc::new(MemoryUserStore::new()));
    config.ip_extractor = Some(IpExtractor::from(ClientIpHeader::XForwardedFor));
    config
}

pub fn test_app() -> App {
    create_app(&test_config()).expect("Failed to create app")
}

/// Request builder pre-filled with the default client fingerprint.
pub fn client_request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", CLIENT_IP)
        .header("user-agent", USER_AGENT)
        .header("x-device-id", DEVICE)
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    client_request(method, uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn bearer_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    client_request(method, uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Register `username` and log in, returning the issued token.
pub async fn register_and_login(app: &App, username: &str) -> String {
    let credentials = serde_json::json!({ "username": username, "password": "hunter22" });

    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", "/api/v1/auth/register", credentials.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", "/api/v1/auth/login", credentials))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    body_json(response).await["data"]
        .as_str()
        .expect("login response carries a token")
        .to_string()
}
