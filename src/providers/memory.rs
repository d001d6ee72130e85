use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::TransportError;
use crate::interfaces::transport::{file_matcher, FileTransport, TransportResult};

/// Exchange server held in process memory.
///
/// All operations run under one lock, so `rename` and `delete` are atomic and
/// exactly one of several racing callers succeeds.
pub struct MemoryTransport {
    name: String,
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    rename_supported: bool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            name: "memory".to_string(),
            files: RwLock::new(BTreeMap::new()),
            rename_supported: true,
        }
    }

    /// A server without RNFR/RNTO, forcing the delete-after-download claim.
    pub fn without_rename() -> Self {
        Self {
            rename_supported: false,
            ..Self::new()
        }
    }

    pub async fn paths(&self) -> Vec<String> {
        self.files.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.files.read().await.contains_key(normalize(path))
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

#[async_trait]
impl FileTransport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> TransportResult<()> {
        let mut files = self.files.write().await;
        files.insert(normalize(path).to_string(), bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> TransportResult<Vec<u8>> {
        let files = self.files.read().await;
        files
            .get(normalize(path))
            .cloned()
            .ok_or_else(|| TransportError::NotFound(path.to_string()))
    }

    async fn list(&self, dir: &str, pattern: &str) -> TransportResult<Vec<String>> {
        let matcher = file_matcher(pattern)?;
        let dir = normalize(dir).trim_end_matches('/');
        let files = self.files.read().await;
        Ok(files
            .keys()
            .map(|key| split(key))
            .filter(|(parent, name)| *parent == dir && matcher.is_match(name))
            .map(|(_, name)| name.to_string())
            .collect())
    }

    async fn delete(&self, path: &str) -> TransportResult<()> {
        let mut files = self.files.write().await;
        files
            .remove(normalize(path))
            .map(|_| ())
            .ok_or_else(|| TransportError::NotFound(path.to_string()))
    }

    async fn rename(&self, from: &str, to: &str) -> TransportResult<()> {
        if !self.rename_supported {
            return Err(TransportError::Unsupported("rename"));
        }
        let mut files = self.files.write().await;
        let bytes = files
            .remove(normalize(from))
            .ok_or_else(|| TransportError::NotFound(from.to_string()))?;
        files.insert(normalize(to).to_string(), bytes);
        Ok(())
    }

    fn supports_rename(&self) -> bool {
        self.rename_supported
    }
}
