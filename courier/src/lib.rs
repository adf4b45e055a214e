//! Outbound queue and retry scheduling for a mail relay
//!
//! Accepted messages are queued once per recipient, handed out in batches to
//! whatever transmits them, and resolved from the reply codes that come
//! back: retried after a fixed interval on a transient failure, or moved to
//! an append-only status store once delivered, rejected, or out of attempts.

pub mod config;
pub mod controller;

pub use config::{BatchConfig, ConfigError, Courier, QueueConfig, StatusConfig};
pub use controller::Relay;
