pub mod client;
pub mod clock;
pub mod config;
pub mod domains;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod interfaces;
pub mod providers;
pub mod services;

pub use crate::client::BridgeClient;
pub use crate::config::Config;
pub use crate::domains::correlation::CorrelationId;
pub use crate::domains::envelope::{Envelope, ResponseEnvelope};
pub use crate::error::{DropBridgeError, Result, TransportError};
pub use crate::services::channel::RequestChannel;
pub use crate::services::listener::{Listener, ListenerStatus};
pub use crate::services::routing::RequestRouter;
