use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use tracing::{error, warn};

use crate::clock::Clock;
use crate::domains::correlation::CorrelationId;
use crate::domains::envelope::{Envelope, ResponseEnvelope};
use crate::error::DropBridgeError;
use crate::interfaces::handlers::{RouteContext, RouteHandler};

struct Route {
    method: String,
    prefix: String,
    handler: Arc<dyn RouteHandler>,
}

/// Maps `(method, path prefix)` to a handler. The longest matching prefix
/// wins.
pub struct RequestRouter {
    routes: Vec<Route>,
    clock: Arc<dyn Clock>,
}

impl RequestRouter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            routes: Vec::new(),
            clock,
        }
    }

    /// Returns `false` if the `(method, prefix)` pair is already taken.
    pub fn register(&mut self, method: &str, prefix: &str, handler: Arc<dyn RouteHandler>) -> bool {
        let method = method.to_ascii_uppercase();
        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.prefix == prefix)
        {
            return false;
        }
        self.routes.push(Route {
            method,
            prefix: prefix.to_string(),
            handler,
        });
        true
    }

    pub fn list_routes(&self) -> Vec<String> {
        self.routes
            .iter()
            .map(|r| format!("{} {} -> {}", r.method, r.prefix, r.handler.name()))
            .collect()
    }

    /// Always produces a response: 404 for an unknown path, 405 for a known
    /// path with another method, 400 for a malformed body and 500 for any
    /// other handler failure, panics included.
    pub async fn handle(&self, id: &CorrelationId, request: &Envelope) -> ResponseEnvelope {
        let now = self.clock.unix_millis();
        let path_matches: Vec<&Route> = self
            .routes
            .iter()
            .filter(|r| prefix_matches(&r.prefix, &request.path))
            .collect();
        if path_matches.is_empty() {
            return ResponseEnvelope::error(
                id.clone(),
                404,
                &format!("Endpoint not found: {}", request.path),
                now,
            );
        }
        let Some(route) = path_matches
            .into_iter()
            .filter(|r| r.method.eq_ignore_ascii_case(&request.method))
            .max_by_key(|r| r.prefix.len())
        else {
            return ResponseEnvelope::error(
                id.clone(),
                405,
                &format!("Unsupported method: {}", request.method),
                now,
            );
        };

        let ctx = RouteContext {
            prefix: route.prefix.clone(),
            remainder: request.path[route.prefix.len()..].to_string(),
            received_at: now,
        };
        let outcome = AssertUnwindSafe(route.handler.handle(request, &ctx))
            .catch_unwind()
            .await;
        let timestamp = self.clock.unix_millis();
        match outcome {
            Ok(Ok(reply)) => ResponseEnvelope {
                id: id.clone(),
                status: reply.status,
                headers: reply.headers,
                body: reply.body,
                timestamp,
            },
            Ok(Err(DropBridgeError::Protocol(message))) => {
                warn!(%id, handler = route.handler.name(), %message, "rejected malformed request");
                ResponseEnvelope::error(id.clone(), 400, &message, timestamp)
            }
            Ok(Err(err)) => {
                error!(%id, handler = route.handler.name(), error = %err, "handler failed");
                ResponseEnvelope::error(id.clone(), 500, &err.to_string(), timestamp)
            }
            Err(_) => {
                error!(%id, handler = route.handler.name(), "handler panicked");
                ResponseEnvelope::new(
                    id.clone(),
                    500,
                    json!({
                        "error": "Internal Server Error",
                        "message": "handler panicked",
                    }),
                    timestamp,
                )
            }
        }
    }
}

/// `/users` matches `/users` and `/users/42` but not `/usersx`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}
