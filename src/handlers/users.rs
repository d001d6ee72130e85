use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domains::envelope::Envelope;
use crate::error::{DropBridgeError, Result};
use crate::interfaces::handlers::{Reply, RouteContext, RouteHandler};

pub struct UsersGet;

#[async_trait]
impl RouteHandler for UsersGet {
    fn name(&self) -> &str {
        "users_get"
    }

    async fn handle(&self, request: &Envelope, ctx: &RouteContext) -> Result<Reply> {
        let id = user_id(request, ctx)
            .ok_or_else(|| DropBridgeError::Protocol("user id is required".to_string()))?;
        Ok(Reply::ok(json!({
            "id": id,
            "name": format!("User {id}"),
            "status": "active",
        })))
    }
}

/// `/users/42` wins over `{"params": {"id": "42"}}`.
fn user_id(request: &Envelope, ctx: &RouteContext) -> Option<String> {
    let from_path = ctx.remainder.trim_matches('/');
    if !from_path.is_empty() {
        return Some(from_path.to_string());
    }
    match request.body.pointer("/params/id")? {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

pub struct UsersCreate;

#[async_trait]
impl RouteHandler for UsersCreate {
    fn name(&self) -> &str {
        "users_create"
    }

    async fn handle(&self, request: &Envelope, ctx: &RouteContext) -> Result<Reply> {
        let Value::Object(mut user) = request.body.clone() else {
            return Err(DropBridgeError::Protocol(
                "user body must be a JSON object".to_string(),
            ));
        };
        user.insert(
            "id".to_string(),
            Value::String(format!("user_{}", ctx.received_at)),
        );
        user.insert("createdAt".to_string(), json!(ctx.received_at));
        user.insert("status".to_string(), json!("active"));
        Ok(Reply::created(Value::Object(user)))
    }
}
