mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use dropbridge::client::BridgeClient;
use dropbridge::gateway::{build_router, GatewayState};
use dropbridge::interfaces::transport::FileTransport;
use dropbridge::providers::memory::MemoryTransport;
use dropbridge::services::listener::Listener;

use common::{channel_over, default_router, listener_over, FaultyTransport};

fn gateway(transport: Arc<dyn FileTransport>, timeout: Duration) -> axum::Router {
    let client = BridgeClient::new(channel_over(transport), timeout);
    build_router(GatewayState {
        client: Arc::new(client),
    })
}

async fn running_bridge() -> (axum::Router, Listener) {
    let transport: Arc<dyn FileTransport> = Arc::new(MemoryTransport::new());
    let listener = listener_over(transport.clone(), default_router());
    listener.start().await;
    (gateway(transport, Duration::from_secs(5)), listener)
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_up() {
    let app = gateway(Arc::new(MemoryTransport::new()), Duration::from_millis(50));
    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
    assert_eq!(body["service"], "dropbridge-gateway");
    assert!(body["timestamp"].is_i64());
}

#[tokio::test]
async fn forwards_user_lookup_and_creation() {
    let (app, listener) = running_bridge().await;

    let request = Request::builder()
        .uri("/api/users/42?verbose=true")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"id": "42", "name": "User 42", "status": "active"}));

    let (status, body) = send(app, post_json("/api/users", json!({"name": "Ada"}))).await;
    listener.stop().await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Ada");
}

#[tokio::test]
async fn proxy_mirrors_envelope_status() {
    let (app, listener) = running_bridge().await;

    let (status, body) = send(app.clone(), post_json("/api/proxy", json!({"ping": 1}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], json!({"ping": 1}));
    assert_eq!(body["processed"], true);

    let (status, body) = send(app, post_json("/api/proxy?path=/nowhere", json!({}))).await;
    listener.stop().await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Endpoint not found: /nowhere");
}

#[tokio::test]
async fn bridge_timeout_is_504() {
    let app = gateway(Arc::new(MemoryTransport::new()), Duration::from_millis(50));
    let (status, body) = send(app, post_json("/api/users", json!({"name": "Ada"}))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "Gateway Timeout");
}

#[tokio::test]
async fn transport_failure_is_502() {
    let transport = Arc::new(FaultyTransport::new());
    transport.fail_gets(true);
    let app = gateway(transport, Duration::from_secs(5));
    let (status, body) = send(app, post_json("/api/proxy", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("connection reset"));
}
