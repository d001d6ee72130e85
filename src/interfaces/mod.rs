pub mod handlers;
pub mod transport;
