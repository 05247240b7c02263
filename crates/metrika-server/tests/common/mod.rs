#![allow(dead_code)]

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use metrika_server::app;
use metrika_server::config::ServerConfig;
use metrika_server::state::{AppState, Envelope};
use metrika_storage::MemStorage;
use metrika_transport::TrustedSubnet;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub fn test_config(temp_dir: &TempDir) -> ServerConfig {
    ServerConfig {
        address: "127.0.0.1:0".to_string(),
        grpc_address: "127.0.0.1:0".to_string(),
        file_storage_path: temp_dir.path().join("metrics-db.json"),
        ..ServerConfig::default()
    }
}

/// Memory-backed app with no key, no encryption and no subnet.
pub fn build_test_context() -> TestContext {
    build_test_context_with(Envelope::new("", None, TrustedSubnet::default()))
}

pub fn build_test_context_with(envelope: Envelope) -> TestContext {
    let temp_dir = tempfile::tempdir().expect("tempdir should be created");
    let config = test_config(&temp_dir);
    let state = AppState::new(&config, Arc::new(MemStorage::new()), envelope);
    let app = app::build_http_app(state.clone());
    TestContext {
        temp_dir,
        state,
        app,
    }
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("router should respond");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    (status, headers, body)
}

pub async fn post_json(app: &axum::Router, uri: &str, body: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    let (status, _, bytes) = send(app, req).await;
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

pub async fn post_empty(app: &axum::Router, uri: &str) -> StatusCode {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await.0
}

pub async fn get_text(app: &axum::Router, uri: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let (status, _, bytes) = send(app, req).await;
    (status, String::from_utf8_lossy(&bytes).into_owned())
}
