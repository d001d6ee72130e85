use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::BridgeClient;
use crate::clock::now_millis;
use crate::domains::envelope::{reason_phrase, ResponseEnvelope};
use crate::error::{DropBridgeError, Result};

#[derive(Clone)]
pub struct GatewayState {
    pub client: Arc<BridgeClient>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: i64,
}

#[derive(Deserialize)]
struct ProxyQuery {
    path: Option<String>,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/users/:id", get(get_user))
        .route("/api/users", post(create_user))
        .route("/api/proxy", post(proxy))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        service: "dropbridge-gateway",
        timestamp: now_millis(),
    })
}

async fn get_user(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    relay(state.client.get(&format!("/users/{id}"), params).await)
}

async fn create_user(State(state): State<GatewayState>, Json(body): Json<Value>) -> Response {
    relay(state.client.post("/users", body).await)
}

async fn proxy(
    State(state): State<GatewayState>,
    Query(query): Query<ProxyQuery>,
    payload: Option<Json<Value>>,
) -> Response {
    let path = query
        .path
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| "/default".to_string());
    let body = payload.map(|Json(body)| body).unwrap_or(Value::Null);
    relay(state.client.post(&path, body).await)
}

/// The envelope status becomes the HTTP status; bridge failures map to 504
/// (timeout), 502 (transport) or 500.
fn relay(result: Result<ResponseEnvelope>) -> Response {
    match result {
        Ok(response) => {
            let status =
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut headers = HeaderMap::new();
            for (name, value) in &response.headers {
                match (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::try_from(value.as_str()),
                ) {
                    (Ok(name), Ok(value)) => {
                        headers.insert(name, value);
                    }
                    _ => warn!(header = %name, "dropping unrepresentable response header"),
                }
            }
            (status, headers, Json(response.body)).into_response()
        }
        Err(err) => {
            let status = match &err {
                DropBridgeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                DropBridgeError::Transport(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!(status = status.as_u16(), error = %err, "bridge call failed");
            (
                status,
                Json(json!({
                    "error": reason_phrase(status.as_u16()),
                    "message": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

pub async fn run(listen: &str, client: Arc<BridgeClient>) -> Result<()> {
    run_with_shutdown(listen, client, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(listen: &str, client: Arc<BridgeClient>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(GatewayState { client });
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| DropBridgeError::Runtime(e.to_string()))?;
    info!(listen, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| DropBridgeError::Runtime(e.to_string()))?;
    Ok(())
}
