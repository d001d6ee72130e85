use crate::domains::correlation::{self, CorrelationId};

pub const REQUEST_PREFIX: &str = "request_";
pub const RESPONSE_PREFIX: &str = "response_";
pub const MAILBOX_SUFFIX: &str = ".json";
pub const REQUEST_PATTERN: &str = "request_*.json";
pub const CLAIMED_DIR: &str = "claimed";
pub const PARTIAL_SUFFIX: &str = ".part";

pub fn request_file_name(id: &CorrelationId) -> String {
    format!("{REQUEST_PREFIX}{id}{MAILBOX_SUFFIX}")
}

pub fn response_file_name(id: &CorrelationId) -> String {
    format!("{RESPONSE_PREFIX}{id}{MAILBOX_SUFFIX}")
}

pub fn request_id(file_name: &str) -> Option<CorrelationId> {
    correlation::parse(file_name, REQUEST_PREFIX, MAILBOX_SUFFIX)
}

pub fn response_id(file_name: &str) -> Option<CorrelationId> {
    correlation::parse(file_name, RESPONSE_PREFIX, MAILBOX_SUFFIX)
}

/// Joins a directory and a name with `/`, the separator every exchange server
/// accepts. An empty directory means the transport root.
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Where requests and responses live on their respective endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxDirs {
    pub requests: String,
    pub responses: String,
}

impl MailboxDirs {
    pub fn new(requests: impl Into<String>, responses: impl Into<String>) -> Self {
        Self {
            requests: requests.into(),
            responses: responses.into(),
        }
    }

    pub fn request_path(&self, id: &CorrelationId) -> String {
        join(&self.requests, &request_file_name(id))
    }

    pub fn response_path(&self, id: &CorrelationId) -> String {
        join(&self.responses, &response_file_name(id))
    }

    pub fn inbox_path(&self, file_name: &str) -> String {
        join(&self.requests, file_name)
    }

    pub fn claimed_dir(&self) -> String {
        join(&self.requests, CLAIMED_DIR)
    }

    pub fn claimed_path(&self, file_name: &str) -> String {
        join(&self.claimed_dir(), file_name)
    }
}

impl Default for MailboxDirs {
    fn default() -> Self {
        Self::new("requests", "responses")
    }
}
