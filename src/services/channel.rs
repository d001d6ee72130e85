use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::domains::correlation::{self, CorrelationId};
use crate::domains::envelope::{Envelope, ResponseEnvelope};
use crate::domains::mailbox::MailboxDirs;
use crate::error::{DropBridgeError, Result, TransportError};
use crate::interfaces::transport::FileTransport;

/// Caller side of the bridge: writes a request file and polls for the
/// matching response file.
pub struct RequestChannel {
    requests: Arc<dyn FileTransport>,
    responses: Arc<dyn FileTransport>,
    mailbox: MailboxDirs,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl RequestChannel {
    pub fn new(
        requests: Arc<dyn FileTransport>,
        responses: Arc<dyn FileTransport>,
        mailbox: MailboxDirs,
    ) -> Self {
        Self {
            requests,
            responses,
            mailbox,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            clock: Arc::new(TokioClock::new()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn mailbox(&self) -> &MailboxDirs {
        &self.mailbox
    }

    /// Sends `envelope` and waits up to `timeout` for its response.
    ///
    /// The envelope keeps its id if it has one, otherwise a fresh one is
    /// assigned. Transport failures other than a missing response file end the
    /// call immediately. A timed-out call leaves its request behind; the
    /// handler may still answer it, producing an orphan response.
    pub async fn call(&self, envelope: Envelope, timeout: Duration) -> Result<ResponseEnvelope> {
        let started = self.clock.now();
        let id = envelope.id.clone().unwrap_or_else(correlation::generate);
        let envelope = Envelope {
            id: Some(id.clone()),
            ..envelope
        };
        let request_path = self.mailbox.request_path(&id);
        self.requests
            .publish(&request_path, envelope.encode()?)
            .await?;
        info!(%id, method = %envelope.method, path = %envelope.path, "request sent");

        let response_path = self.mailbox.response_path(&id);
        let mut unreadable: Option<DropBridgeError> = None;
        loop {
            let elapsed = self.clock.now().saturating_sub(started);
            if elapsed >= timeout {
                if let Some(err) = unreadable {
                    return Err(err);
                }
                warn!(%id, elapsed_ms = elapsed.as_millis() as u64, "no response before deadline");
                return Err(DropBridgeError::Timeout {
                    id: id.to_string(),
                    elapsed,
                });
            }
            self.clock
                .sleep(self.poll_interval.min(timeout - elapsed))
                .await;

            let bytes = match self.responses.get(&response_path).await {
                Ok(bytes) => bytes,
                Err(TransportError::NotFound(_)) => continue,
                Err(err) => return Err(err.into()),
            };
            match ResponseEnvelope::decode(&bytes) {
                Ok(response) => {
                    let response = self.accept(&id, &response_path, response).await?;
                    let elapsed = self.clock.now().saturating_sub(started);
                    info!(
                        %id,
                        status = response.status,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "response received"
                    );
                    return Ok(response);
                }
                // Possibly still being written by a server without rename.
                Err(err) => {
                    debug!(%id, error = %err, "response file not readable yet");
                    unreadable = Some(err);
                }
            }
        }
    }

    async fn accept(
        &self,
        id: &CorrelationId,
        path: &str,
        response: ResponseEnvelope,
    ) -> Result<ResponseEnvelope> {
        if response.id != *id {
            return Err(DropBridgeError::Protocol(format!(
                "{path} carries response id {} instead of {id}",
                response.id
            )));
        }
        match self.responses.delete(path).await {
            Ok(()) | Err(TransportError::NotFound(_)) => {}
            Err(err) => warn!(%id, error = %err, "could not remove consumed response file"),
        }
        Ok(response)
    }
}
