use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domains::mailbox::MailboxDirs;
use crate::error::{DropBridgeError, Result};
use crate::services::listener::ClaimStrategy;

pub const DEFAULT_FTPS_PORT: u16 = 21;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DATA_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_GATEWAY_LISTEN: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ftps,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read: Duration::from_millis(DEFAULT_DATA_TIMEOUT_MS),
            write: Duration::from_millis(DEFAULT_DATA_TIMEOUT_MS),
        }
    }
}

/// One exchange server (or local share) and the directory used on it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub transport: Option<TransportKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub password_env: Option<String>,
    pub tls_server_name: Option<String>,
    pub ca_cert_path: Option<String>,
    pub root: Option<String>,
    pub directory: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
}

impl EndpointConfig {
    pub fn kind(&self) -> TransportKind {
        self.transport.unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_FTPS_PORT)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(
                self.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            read: Duration::from_millis(self.read_timeout_ms.unwrap_or(DEFAULT_DATA_TIMEOUT_MS)),
            write: Duration::from_millis(self.write_timeout_ms.unwrap_or(DEFAULT_DATA_TIMEOUT_MS)),
        }
    }

    fn directory_or(&self, fallback: &str) -> String {
        self.directory
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }

    fn resolve_env(&mut self) -> Result<()> {
        if self.password.is_some() {
            return Ok(());
        }
        if let Some(var) = &self.password_env {
            let value = std::env::var(var).map_err(|e| {
                DropBridgeError::Config(format!("password_env {var} is not usable: {e}"))
            })?;
            self.password = Some(value);
        }
        Ok(())
    }
}

/// Caller side: where requests are written and where responses are awaited.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallerConfig {
    pub requests: EndpointConfig,
    pub responses: Option<EndpointConfig>,
    pub poll_interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl CallerConfig {
    pub fn responses_endpoint(&self) -> EndpointConfig {
        responses_or_requests(&self.responses, &self.requests)
    }

    pub fn mailbox(&self) -> MailboxDirs {
        mailbox_dirs(&self.requests, &self.responses_endpoint())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                .max(1),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_CALL_TIMEOUT_MS))
    }
}

/// Handler side: where requests are discovered and where responses go.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandlerConfig {
    pub requests: EndpointConfig,
    pub responses: Option<EndpointConfig>,
    pub scan_interval_ms: Option<u64>,
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub claim: Option<ClaimStrategy>,
}

impl HandlerConfig {
    pub fn responses_endpoint(&self) -> EndpointConfig {
        responses_or_requests(&self.responses, &self.requests)
    }

    pub fn mailbox(&self) -> MailboxDirs {
        mailbox_dirs(&self.requests, &self.responses_endpoint())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(
            self.scan_interval_ms
                .unwrap_or(DEFAULT_SCAN_INTERVAL_MS)
                .max(1),
        )
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or(DEFAULT_WORKERS).max(1)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY).max(1)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub listen: Option<String>,
}

impl GatewayConfig {
    pub fn listen(&self) -> String {
        self.listen
            .clone()
            .unwrap_or_else(|| DEFAULT_GATEWAY_LISTEN.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub caller: Option<CallerConfig>,
    pub handler: Option<HandlerConfig>,
    pub gateway: Option<GatewayConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DropBridgeError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| DropBridgeError::Config(e.to_string()))?;
        config.resolve_env()
    }

    /// Fills endpoint passwords from their `password_env` variables.
    pub fn resolve_env(mut self) -> Result<Self> {
        if let Some(caller) = &mut self.caller {
            caller.requests.resolve_env()?;
            if let Some(responses) = &mut caller.responses {
                responses.resolve_env()?;
            }
        }
        if let Some(handler) = &mut self.handler {
            handler.requests.resolve_env()?;
            if let Some(responses) = &mut handler.responses {
                responses.resolve_env()?;
            }
        }
        Ok(self)
    }

    pub fn caller(&self) -> Result<&CallerConfig> {
        self.caller
            .as_ref()
            .ok_or_else(|| DropBridgeError::Config("missing \"caller\" section".to_string()))
    }

    pub fn handler(&self) -> Result<&HandlerConfig> {
        self.handler
            .as_ref()
            .ok_or_else(|| DropBridgeError::Config("missing \"handler\" section".to_string()))
    }
}

fn responses_or_requests(
    responses: &Option<EndpointConfig>,
    requests: &EndpointConfig,
) -> EndpointConfig {
    responses.clone().unwrap_or_else(|| EndpointConfig {
        directory: None,
        ..requests.clone()
    })
}

fn mailbox_dirs(requests: &EndpointConfig, responses: &EndpointConfig) -> MailboxDirs {
    MailboxDirs::new(
        requests.directory_or("requests"),
        responses.directory_or("responses"),
    )
}
