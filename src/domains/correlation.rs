use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DropBridgeError;

/// Token linking a request file to its response file.
///
/// Always non-empty and limited to `[A-Za-z0-9_-]`, so it can be embedded in a
/// file name on any server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = DropBridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err(DropBridgeError::Protocol(
                "correlation id must not be empty".to_string(),
            ));
        }
        if !value.chars().all(is_id_char) {
            return Err(DropBridgeError::Protocol(format!(
                "correlation id is not filename-safe: {value}"
            )));
        }
        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = DropBridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CorrelationId> for String {
    fn from(value: CorrelationId) -> Self {
        value.0
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// New time-ordered random id (UUIDv7 as 32 lowercase hex chars).
pub fn generate() -> CorrelationId {
    CorrelationId(Uuid::now_v7().simple().to_string())
}

/// Extracts the id from `{prefix}{id}{suffix}`, or `None` if the name does not
/// have that shape or the id is not filename-safe.
pub fn parse(file_name: &str, prefix: &str, suffix: &str) -> Option<CorrelationId> {
    let id = file_name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    id.parse().ok()
}
