use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::{CallerConfig, Config};
use crate::domains::envelope::{Envelope, ResponseEnvelope};
use crate::error::Result;
use crate::services::channel::RequestChannel;
use crate::services::transport::build_transport;

/// Caller-side entry point: HTTP-flavoured calls over the file bridge.
pub struct BridgeClient {
    channel: RequestChannel,
    timeout: Duration,
}

impl BridgeClient {
    pub fn new(channel: RequestChannel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    pub fn from_config(config: &CallerConfig) -> Result<Self> {
        let requests = build_transport(&config.requests)?;
        let responses = build_transport(&config.responses_endpoint())?;
        let channel = RequestChannel::new(requests, responses, config.mailbox())
            .with_poll_interval(config.poll_interval());
        Ok(Self::new(channel, config.timeout()))
    }

    pub fn from_config_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::from_file(path)?;
        Self::from_config(config.caller()?)
    }

    pub fn channel(&self) -> &RequestChannel {
        &self.channel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn call(&self, envelope: Envelope) -> Result<ResponseEnvelope> {
        self.channel.call(envelope, self.timeout).await
    }

    /// Query parameters travel as `body.params`.
    pub async fn get(&self, path: &str, params: BTreeMap<String, String>) -> Result<ResponseEnvelope> {
        let mut envelope = Envelope::new("GET", path);
        if !params.is_empty() {
            envelope = envelope.with_body(json!({ "params": params }));
        }
        self.call(envelope).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<ResponseEnvelope> {
        self.call(Envelope::new("POST", path).with_body(body)).await
    }
}
