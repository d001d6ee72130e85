pub mod correlation;
pub mod envelope;
pub mod mailbox;
