//! Policy abstractions for delivery outcomes.
//!
//! Policies are pure: they look at a record and an outcome and return a
//! decision, leaving every store interaction to the resolver.

pub mod retry;

pub use retry::{Decision, RetryPolicy};
