use std::time::Duration;

use thiserror::Error;

/// Failure kinds reported by a [`FileTransport`](crate::interfaces::transport::FileTransport).
///
/// Transports never retry; they surface exactly one of these so the layer above
/// can decide what to do.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("operation not supported by transport: {0}")]
    Unsupported(&'static str),
    #[error("invalid file pattern: {0}")]
    Pattern(String),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum DropBridgeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("timed out after {}ms waiting for response {id}", .elapsed.as_millis())]
    Timeout { id: String, elapsed: Duration },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("handler error: {0}")]
    Handler(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl DropBridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, DropBridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure_kind() {
        let err = DropBridgeError::Config("x".to_string());
        assert!(format!("{err}").contains("configuration error"));

        let err: DropBridgeError = TransportError::NotFound("requests/a.json".to_string()).into();
        assert_eq!(
            err.to_string(),
            "transport error: file not found: requests/a.json"
        );

        let err = DropBridgeError::Timeout {
            id: "abc".to_string(),
            elapsed: Duration::from_millis(1500),
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "timed out after 1500ms waiting for response abc"
        );
    }
}
