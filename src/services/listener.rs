use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::{
    HandlerConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_SCAN_INTERVAL_MS, DEFAULT_WORKERS,
};
use crate::domains::correlation::CorrelationId;
use crate::domains::envelope::{Envelope, ResponseEnvelope};
use crate::domains::mailbox::{self, MailboxDirs, REQUEST_PATTERN};
use crate::error::{DropBridgeError, Result, TransportError};
use crate::interfaces::transport::FileTransport;
use crate::services::routing::RequestRouter;
use crate::services::transport::build_transport;

const CLAIMED_READ_ATTEMPTS: u32 = 3;
const CLAIMED_READ_BACKOFF: Duration = Duration::from_millis(200);

/// Contents of a claimed request file, or why they could not be read.
type Download = std::result::Result<Vec<u8>, TransportError>;

/// How a worker takes exclusive ownership of a request file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStrategy {
    /// Move the file into `claimed/` before reading it. Only one rename of a
    /// given file can succeed, so only one worker ever processes it.
    Rename,
    /// Read the file, then delete it, and continue only if our own delete
    /// succeeded. Two workers can both read the file before either deletes
    /// it; whether both deletes can succeed depends on the server, so handlers
    /// behind this strategy must be idempotent.
    Delete,
}

impl ClaimStrategy {
    pub fn for_transport(transport: &dyn FileTransport) -> Self {
        if transport.supports_rename() {
            Self::Rename
        } else {
            Self::Delete
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListenerStatus {
    Running,
    Stopped,
}

impl fmt::Display for ListenerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("RUNNING"),
            Self::Stopped => f.write_str("STOPPED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    /// A response file was published.
    Responded { id: CorrelationId, status: u16 },
    /// Another worker owns the file, or the name is not a request file.
    Skipped,
}

/// Claims one request file, routes it and publishes exactly one response.
#[derive(Clone)]
pub struct RequestWorker {
    requests: Arc<dyn FileTransport>,
    responses: Arc<dyn FileTransport>,
    router: Arc<RequestRouter>,
    mailbox: MailboxDirs,
    claim: ClaimStrategy,
    clock: Arc<dyn Clock>,
}

impl RequestWorker {
    pub fn new(
        requests: Arc<dyn FileTransport>,
        responses: Arc<dyn FileTransport>,
        router: Arc<RequestRouter>,
        mailbox: MailboxDirs,
    ) -> Self {
        let claim = ClaimStrategy::for_transport(requests.as_ref());
        Self {
            requests,
            responses,
            router,
            mailbox,
            claim,
            clock: Arc::new(TokioClock::new()),
        }
    }

    pub fn with_claim(mut self, claim: ClaimStrategy) -> Self {
        self.claim = claim;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn claim(&self) -> ClaimStrategy {
        self.claim
    }

    pub async fn process(&self, file_name: &str) -> Result<WorkOutcome> {
        let Some(id) = mailbox::request_id(file_name) else {
            debug!(file = file_name, "not a request file");
            return Ok(WorkOutcome::Skipped);
        };
        let Some(download) = self.claim_and_download(file_name).await? else {
            return Ok(WorkOutcome::Skipped);
        };

        let response = match download {
            Ok(bytes) => match Envelope::decode(&bytes).and_then(|e| matching_id(e, &id)) {
                Ok(envelope) => self.router.handle(&id, &envelope).await,
                Err(err) => {
                    warn!(%id, file = file_name, error = %err, "unusable request envelope");
                    ResponseEnvelope::error(
                        id.clone(),
                        400,
                        &err.to_string(),
                        self.clock.unix_millis(),
                    )
                }
            },
            Err(err) => {
                error!(%id, file = file_name, error = %err, "claimed request could not be read");
                ResponseEnvelope::error(
                    id.clone(),
                    500,
                    &format!("claimed request could not be read: {err}"),
                    self.clock.unix_millis(),
                )
            }
        };

        let status = response.status;
        // The request is already consumed; a failed upload is not redelivered.
        self.responses
            .publish(&self.mailbox.response_path(&id), response.encode()?)
            .await?;
        info!(%id, status, "response published");
        Ok(WorkOutcome::Responded { id, status })
    }

    /// `None` when another worker won the claim. Once the file is ours a
    /// failed download is returned inside `Some` so it still gets an answer.
    async fn claim_and_download(&self, file_name: &str) -> Result<Option<Download>> {
        let inbox = self.mailbox.inbox_path(file_name);
        match self.claim {
            ClaimStrategy::Rename => {
                let claimed = self.mailbox.claimed_path(file_name);
                match self.requests.rename(&inbox, &claimed).await {
                    Ok(()) => {}
                    Err(TransportError::NotFound(_)) => {
                        debug!(file = file_name, "already claimed");
                        return Ok(None);
                    }
                    Err(err) => return Err(err.into()),
                }
                let download = self.download_claimed(&claimed).await;
                match &download {
                    Ok(_) => {
                        if let Err(err) = self.requests.delete(&claimed).await {
                            warn!(file = file_name, error = %err, "could not remove claimed request");
                        }
                    }
                    Err(_) => warn!(file = %claimed, "leaving unreadable claimed request in place"),
                }
                Ok(Some(download))
            }
            ClaimStrategy::Delete => {
                let bytes = match self.requests.get(&inbox).await {
                    Ok(bytes) => bytes,
                    Err(TransportError::NotFound(_)) => return Ok(None),
                    Err(err) => return Err(err.into()),
                };
                match self.requests.delete(&inbox).await {
                    Ok(()) => Ok(Some(Ok(bytes))),
                    Err(TransportError::NotFound(_)) => {
                        debug!(file = file_name, "lost delete claim");
                        Ok(None)
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    async fn download_claimed(&self, claimed: &str) -> Download {
        let mut attempt = 1;
        loop {
            match self.requests.get(claimed).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.is_not_found() || attempt >= CLAIMED_READ_ATTEMPTS => {
                    return Err(err)
                }
                Err(err) => {
                    debug!(file = claimed, attempt, error = %err, "retrying claimed request read");
                    attempt += 1;
                    self.clock.sleep(CLAIMED_READ_BACKOFF).await;
                }
            }
        }
    }
}

fn matching_id(envelope: Envelope, file_id: &CorrelationId) -> Result<Envelope> {
    match &envelope.id {
        Some(id) if id == file_id => Ok(envelope),
        Some(id) => Err(DropBridgeError::Protocol(format!(
            "envelope id {id} does not match file id {file_id}"
        ))),
        None => Err(DropBridgeError::Protocol(
            "request envelope has no id".to_string(),
        )),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListenerSettings {
    pub scan_interval: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(DEFAULT_SCAN_INTERVAL_MS),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

type InFlight = Arc<Mutex<HashSet<String>>>;

#[derive(Clone)]
struct Scanner {
    transport: Arc<dyn FileTransport>,
    mailbox: MailboxDirs,
    in_flight: InFlight,
    queue: mpsc::Sender<String>,
}

impl Scanner {
    async fn scan(&self) -> Result<usize> {
        let names = self
            .transport
            .list(&self.mailbox.requests, REQUEST_PATTERN)
            .await?;
        let mut dispatched = 0;
        for name in names {
            if mailbox::request_id(&name).is_none() {
                debug!(file = %name, "ignoring file with unusable id");
                continue;
            }
            if !mark(&self.in_flight, &name) {
                continue;
            }
            match self.queue.try_send(name) {
                Ok(()) => dispatched += 1,
                Err(TrySendError::Full(name)) | Err(TrySendError::Closed(name)) => {
                    unmark(&self.in_flight, &name);
                    debug!("worker queue full, leaving the rest for the next scan");
                    break;
                }
            }
        }
        if dispatched > 0 {
            info!(dispatched, "dispatched request files");
        }
        Ok(dispatched)
    }
}

fn mark(in_flight: &InFlight, name: &str) -> bool {
    let mut guard = in_flight.lock().unwrap_or_else(|e| e.into_inner());
    guard.insert(name.to_string())
}

fn unmark(in_flight: &InFlight, name: &str) {
    let mut guard = in_flight.lock().unwrap_or_else(|e| e.into_inner());
    guard.remove(name);
}

struct Pool {
    stop_tx: watch::Sender<bool>,
    scanner: Scanner,
    ticker: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Handler side of the bridge: a fixed-delay scan of the request directory
/// feeding a bounded pool of [`RequestWorker`]s.
pub struct Listener {
    worker: RequestWorker,
    settings: ListenerSettings,
    ticker_clock: Arc<dyn Clock>,
    running: AtomicBool,
    in_flight: InFlight,
    pool: tokio::sync::Mutex<Option<Pool>>,
}

impl Listener {
    pub fn new(worker: RequestWorker, settings: ListenerSettings) -> Self {
        Self {
            worker,
            settings,
            ticker_clock: Arc::new(TokioClock::new()),
            running: AtomicBool::new(false),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pool: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_config(config: &HandlerConfig, router: Arc<RequestRouter>) -> Result<Self> {
        let requests = build_transport(&config.requests)?;
        let responses = build_transport(&config.responses_endpoint())?;
        let claim = config
            .claim
            .unwrap_or_else(|| ClaimStrategy::for_transport(requests.as_ref()));
        if claim == ClaimStrategy::Rename && !requests.supports_rename() {
            return Err(DropBridgeError::Config(format!(
                "{} cannot rename, use \"claim\": \"delete\"",
                requests.name()
            )));
        }
        let worker =
            RequestWorker::new(requests, responses, router, config.mailbox()).with_claim(claim);
        let settings = ListenerSettings {
            scan_interval: config.scan_interval(),
            workers: config.workers(),
            queue_capacity: config.queue_capacity(),
        };
        Ok(Self::new(worker, settings))
    }

    /// Clock pacing the scan ticker. It must really wait in `sleep`; the
    /// worker's own clock only stamps responses and paces read retries.
    pub fn with_ticker_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ticker_clock = clock;
        self
    }

    pub fn status(&self) -> ListenerStatus {
        if self.running.load(Ordering::SeqCst) {
            ListenerStatus::Running
        } else {
            ListenerStatus::Stopped
        }
    }

    /// Spawns the ticker and the worker pool. No-op when already running.
    pub async fn start(&self) {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return;
        }

        let (queue_tx, queue_rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let workers = (0..self.settings.workers.max(1))
            .map(|index| {
                tokio::spawn(run_worker(
                    index,
                    self.worker.clone(),
                    queue_rx.clone(),
                    self.in_flight.clone(),
                ))
            })
            .collect();

        let scanner = Scanner {
            transport: self.worker.requests.clone(),
            mailbox: self.worker.mailbox.clone(),
            in_flight: self.in_flight.clone(),
            queue: queue_tx,
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let ticker = tokio::spawn(run_ticker(
            scanner.clone(),
            self.ticker_clock.clone(),
            self.settings.scan_interval,
            stop_rx,
        ));

        *pool = Some(Pool {
            stop_tx,
            scanner,
            ticker,
            workers,
        });
        self.running.store(true, Ordering::SeqCst);
        info!(
            source = self.worker.requests.name(),
            workers = self.settings.workers,
            claim = ?self.worker.claim,
            "listener started"
        );
    }

    /// Stops scanning, then waits for queued and in-flight requests to be
    /// answered. No `list` call happens after this returns. No-op when
    /// already stopped.
    pub async fn stop(&self) {
        let mut guard = self.pool.lock().await;
        let Some(pool) = guard.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        let _ = pool.stop_tx.send(true);
        if let Err(err) = pool.ticker.await {
            error!(error = %err, "scan ticker ended abnormally");
        }
        // Dropping the last sender closes the queue; workers drain it and exit.
        drop(pool.scanner);
        for worker in pool.workers {
            if let Err(err) = worker.await {
                error!(error = %err, "worker ended abnormally");
            }
        }
        info!("listener stopped");
    }

    /// One scan outside the ticker; returns how many files were dispatched.
    /// Does nothing while stopped.
    pub async fn scan(&self) -> Result<usize> {
        let scanner = match self.pool.lock().await.as_ref() {
            Some(pool) => pool.scanner.clone(),
            None => return Ok(0),
        };
        scanner.scan().await
    }
}

async fn run_ticker(
    scanner: Scanner,
    clock: Arc<dyn Clock>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = clock.sleep(interval) => {}
        }
        if *stop_rx.borrow() {
            break;
        }
        if let Err(err) = scanner.scan().await {
            error!(error = %err, "scan failed");
        }
    }
}

async fn run_worker(
    index: usize,
    worker: RequestWorker,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    in_flight: InFlight,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(file_name) = next else {
            break;
        };
        match worker.process(&file_name).await {
            Ok(outcome) => debug!(worker = index, file = %file_name, ?outcome, "request handled"),
            Err(err) => error!(worker = index, file = %file_name, error = %err, "request failed"),
        }
        unmark(&in_flight, &file_name);
    }
}
