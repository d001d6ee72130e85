use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::clock::now_millis;
use crate::domains::correlation::CorrelationId;
use crate::error::{DropBridgeError, Result};

/// A request as carried inside `request_{id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
    pub created_at: i64,
}

impl Envelope {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: Value::Null,
            created_at: now_millis(),
        }
    }

    pub fn with_id(mut self, id: CorrelationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DropBridgeError::Serialization(e.to_string()))
    }

    /// Parses a request file. Missing required fields, an empty method or path,
    /// or an unsafe id are protocol errors.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| DropBridgeError::Protocol(format!("malformed request envelope: {e}")))?;
        if envelope.method.trim().is_empty() {
            return Err(DropBridgeError::Protocol(
                "request envelope has an empty method".to_string(),
            ));
        }
        if envelope.path.trim().is_empty() {
            return Err(DropBridgeError::Protocol(
                "request envelope has an empty path".to_string(),
            ));
        }
        Ok(envelope)
    }
}

/// A reply as carried inside `response_{id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub id: CorrelationId,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
    pub timestamp: i64,
}

impl ResponseEnvelope {
    pub fn new(id: CorrelationId, status: u16, body: Value, timestamp: i64) -> Self {
        Self {
            id,
            status,
            headers: BTreeMap::new(),
            body,
            timestamp,
        }
    }

    /// Error reply with a `{error, message}` body.
    pub fn error(id: CorrelationId, status: u16, message: &str, timestamp: i64) -> Self {
        let body = json!({
            "error": reason_phrase(status),
            "message": message,
        });
        Self::new(id, status, body, timestamp)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DropBridgeError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| DropBridgeError::Protocol(format!("malformed response envelope: {e}")))
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}
