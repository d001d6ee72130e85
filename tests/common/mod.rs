#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, Notify};

use dropbridge::clock::TokioClock;
use dropbridge::domains::envelope::Envelope;
use dropbridge::domains::mailbox::MailboxDirs;
use dropbridge::error::{DropBridgeError, Result, TransportError};
use dropbridge::handlers;
use dropbridge::interfaces::handlers::{Reply, RouteContext, RouteHandler};
use dropbridge::interfaces::transport::{FileTransport, TransportResult};
use dropbridge::providers::memory::MemoryTransport;
use dropbridge::services::channel::RequestChannel;
use dropbridge::services::listener::{Listener, ListenerSettings, RequestWorker};
use dropbridge::services::routing::RequestRouter;

/// Memory exchange with knobs for failure injection and call counting.
pub struct FaultyTransport {
    inner: MemoryTransport,
    pub list_calls: AtomicUsize,
    pub get_delay: Duration,
    fail_gets: AtomicBool,
}

impl FaultyTransport {
    pub fn new() -> Self {
        Self::wrap(MemoryTransport::new())
    }

    pub fn without_rename() -> Self {
        Self::wrap(MemoryTransport::without_rename())
    }

    fn wrap(inner: MemoryTransport) -> Self {
        Self {
            inner,
            list_calls: AtomicUsize::new(0),
            get_delay: Duration::ZERO,
            fail_gets: AtomicBool::new(false),
        }
    }

    pub fn with_get_delay(mut self, delay: Duration) -> Self {
        self.get_delay = delay;
        self
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub async fn paths(&self) -> Vec<String> {
        self.inner.paths().await
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.inner.contains(path).await
    }
}

#[async_trait]
impl FileTransport for FaultyTransport {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> TransportResult<()> {
        self.inner.put(path, bytes).await
    }

    async fn get(&self, path: &str) -> TransportResult<Vec<u8>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection reset".to_string()));
        }
        if !self.get_delay.is_zero() {
            tokio::time::sleep(self.get_delay).await;
        }
        self.inner.get(path).await
    }

    async fn list(&self, dir: &str, pattern: &str) -> TransportResult<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list(dir, pattern).await
    }

    async fn delete(&self, path: &str) -> TransportResult<()> {
        self.inner.delete(path).await
    }

    async fn rename(&self, from: &str, to: &str) -> TransportResult<()> {
        self.inner.rename(from, to).await
    }

    fn supports_rename(&self) -> bool {
        self.inner.supports_rename()
    }
}

/// Sleeps, then answers 200. Signals `started` on entry.
pub struct SlowHandler {
    pub delay: Duration,
    pub started: Arc<Notify>,
    pub finished: AtomicUsize,
}

impl SlowHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Arc::new(Notify::new()),
            finished: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RouteHandler for SlowHandler {
    fn name(&self) -> &str {
        "slow"
    }

    async fn handle(&self, _request: &Envelope, _ctx: &RouteContext) -> Result<Reply> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(Reply::ok(json!({"slow": true})))
    }
}

pub struct PanickingHandler;

#[async_trait]
impl RouteHandler for PanickingHandler {
    fn name(&self) -> &str {
        "panics"
    }

    async fn handle(&self, _request: &Envelope, _ctx: &RouteContext) -> Result<Reply> {
        panic!("boom");
    }
}

pub struct FailingHandler;

#[async_trait]
impl RouteHandler for FailingHandler {
    fn name(&self) -> &str {
        "fails"
    }

    async fn handle(&self, _request: &Envelope, _ctx: &RouteContext) -> Result<Reply> {
        Err(DropBridgeError::Handler("database unavailable".to_string()))
    }
}

/// Keeps every request it sees.
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Mutex<Vec<(Envelope, RouteContext)>>,
}

#[async_trait]
impl RouteHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    async fn handle(&self, request: &Envelope, ctx: &RouteContext) -> Result<Reply> {
        self.seen.lock().await.push((request.clone(), ctx.clone()));
        Ok(Reply::ok(json!({"handler": "recording", "path": request.path})))
    }
}

pub fn default_router() -> RequestRouter {
    let mut router = RequestRouter::new(Arc::new(TokioClock::new()));
    handlers::register_defaults(&mut router);
    router
}

pub fn fast_settings() -> ListenerSettings {
    ListenerSettings {
        scan_interval: Duration::from_millis(10),
        workers: 4,
        queue_capacity: 16,
    }
}

pub fn channel_over(transport: Arc<dyn FileTransport>) -> RequestChannel {
    RequestChannel::new(transport.clone(), transport, MailboxDirs::default())
        .with_poll_interval(Duration::from_millis(10))
}

pub fn listener_over(transport: Arc<dyn FileTransport>, router: RequestRouter) -> Listener {
    let worker = RequestWorker::new(
        transport.clone(),
        transport,
        Arc::new(router),
        MailboxDirs::default(),
    );
    Listener::new(worker, fast_settings())
}

/// Polls until `path` exists or two seconds pass.
pub async fn wait_for(transport: &dyn FileTransport, path: &str) -> Vec<u8> {
    for _ in 0..200 {
        match transport.get(path).await {
            Ok(bytes) => return bytes,
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    panic!("{path} never appeared");
}
