//! Retry policy for delivery outcomes.
//!
//! Decides, from the attempt count and the classification of the latest
//! reply code, whether a record goes back into the queue or is finalized.
//! Retries are spaced by a fixed interval rather than a backoff curve; the
//! queue store enforces it when selecting records due for retry.

use std::time::Duration;

use courier_common::Classification;
use courier_store::Resolution;
use serde::{Deserialize, Serialize};

/// What to do with a record after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep the record queued for another attempt
    Retry,
    /// Move the record to the status store
    Finalize(Resolution),
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts before giving up, whatever the
    /// outcome of the last one.
    ///
    /// A value of 0 behaves like 1: every attempt is final.
    ///
    /// Default: 5 attempts
    #[serde(default = "defaults::max_repeat_send")]
    pub max_repeat_send: u32,

    /// Minimum spacing between two attempts of the same record (in minutes).
    ///
    /// Default: 15 minutes
    #[serde(default = "defaults::retry_interval_mins")]
    pub retry_interval_mins: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_repeat_send: defaults::max_repeat_send(),
            retry_interval_mins: defaults::retry_interval_mins(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The effective retry ceiling
    #[must_use]
    pub const fn ceiling(&self) -> u32 {
        if self.max_repeat_send == 0 {
            1
        } else {
            self.max_repeat_send
        }
    }

    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_mins.saturating_mul(60))
    }

    /// Has a record that has made `repeat_count` attempts run out of them?
    #[must_use]
    pub const fn is_final_attempt(&self, repeat_count: u32) -> bool {
        repeat_count >= self.ceiling()
    }

    /// Attempts left after `repeat_count` have been made.
    #[must_use]
    pub const fn remaining_attempts(&self, repeat_count: u32) -> u32 {
        self.ceiling().saturating_sub(repeat_count)
    }

    /// Decide the fate of a record that has now made `repeat_count` attempts,
    /// the latest of which ended as `classification`.
    ///
    /// Only a transient failure below the ceiling is retried. At the ceiling
    /// a transient failure expires the record. Success and permanent failure
    /// finalize regardless of the count, as does an unknown code, which is
    /// treated as a permanent failure.
    #[must_use]
    pub const fn decide(&self, repeat_count: u32, classification: Classification) -> Decision {
        match classification {
            Classification::TransientFailure if self.is_final_attempt(repeat_count) => {
                Decision::Finalize(Resolution::Expired)
            }
            Classification::TransientFailure => Decision::Retry,
            Classification::Success => Decision::Finalize(Resolution::Delivered),
            Classification::PermanentFailure | Classification::Unknown => {
                Decision::Finalize(Resolution::Failed)
            }
        }
    }
}

mod defaults {
    pub const fn max_repeat_send() -> u32 {
        5
    }

    pub const fn retry_interval_mins() -> u64 {
        15
    }
}
