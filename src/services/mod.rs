pub mod channel;
pub mod listener;
pub mod routing;
pub mod transport;
