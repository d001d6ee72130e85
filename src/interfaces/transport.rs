use async_trait::async_trait;
use globset::{Glob, GlobMatcher};

use crate::domains::mailbox::PARTIAL_SUFFIX;
use crate::error::TransportError;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Named-file access to one exchange endpoint.
///
/// Every call opens and closes its own session. Paths are `/`-separated and
/// relative to the endpoint root unless absolute.
#[async_trait]
pub trait FileTransport: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Writes `bytes` to `path`, replacing any existing file.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> TransportResult<()>;

    /// Reads the whole file; `NotFound` if it does not exist.
    async fn get(&self, path: &str) -> TransportResult<Vec<u8>>;

    /// Bare names of the files in `dir` matching the glob `pattern`.
    async fn list(&self, dir: &str, pattern: &str) -> TransportResult<Vec<String>>;

    /// Removes the file; `NotFound` if it is already gone.
    async fn delete(&self, path: &str) -> TransportResult<()>;

    /// Atomically moves `from` to `to`; `NotFound` if `from` is gone.
    async fn rename(&self, _from: &str, _to: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported("rename"))
    }

    fn supports_rename(&self) -> bool {
        false
    }

    /// Writes `path` so readers never observe a partial file: upload to
    /// `{path}.part` and rename when the transport can, plain `put` otherwise.
    async fn publish(&self, path: &str, bytes: Vec<u8>) -> TransportResult<()> {
        if !self.supports_rename() {
            return self.put(path, bytes).await;
        }
        let partial = format!("{path}{PARTIAL_SUFFIX}");
        self.put(&partial, bytes).await?;
        self.rename(&partial, path).await
    }
}

pub fn file_matcher(pattern: &str) -> TransportResult<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| TransportError::Pattern(e.to_string()))
}
