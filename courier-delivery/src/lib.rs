//! Retry scheduling and status resolution for queued deliveries
//!
//! This crate provides:
//! - The retry policy deciding between another attempt and finalization
//! - The resolver applying that decision to the queue and status stores

mod error;
pub mod policy;
mod resolver;

pub use error::{DeliveryError, Result};
pub use policy::{Decision, RetryPolicy};
pub use resolver::{Resolved, StatusResolver};
