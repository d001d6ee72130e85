use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::domains::envelope::Envelope;
use crate::error::Result;

/// What the router knows about a request when it reaches a handler.
#[derive(Debug, Clone)]
pub struct RouteContext {
    /// The registered prefix that matched.
    pub prefix: String,
    /// The part of the path after `prefix`.
    pub remainder: String,
    /// Wall-clock milliseconds at dispatch.
    pub received_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl Reply {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn created(body: Value) -> Self {
        Self::new(201, body)
    }
}

/// Business logic behind one route.
///
/// Return `DropBridgeError::Protocol` for a malformed request body (answered
/// with 400); any other error is answered with 500.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, request: &Envelope, ctx: &RouteContext) -> Result<Reply>;
}
