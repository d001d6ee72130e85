use async_trait::async_trait;
use serde_json::json;

use crate::domains::envelope::Envelope;
use crate::error::Result;
use crate::interfaces::handlers::{Reply, RouteContext, RouteHandler};

/// Answers with whatever it received.
pub struct Echo;

#[async_trait]
impl RouteHandler for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn handle(&self, request: &Envelope, ctx: &RouteContext) -> Result<Reply> {
        Ok(Reply::ok(json!({
            "received": request.body,
            "processed": true,
            "processedAt": ctx.received_at,
        })))
    }
}
