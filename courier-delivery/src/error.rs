//! Errors surfaced while resolving delivery outcomes.
//!
//! Store failures are passed through untouched for the scheduler to retry on
//! its next poll. A failed status write during finalization gets its own
//! variant: the queue record is kept in that case, and callers usually want
//! to tell it apart.

use courier_store::{QueueId, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A queue or status store operation failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The status row could not be written, so the queue record was kept
    #[error("Failed to finalize {id}, record kept in queue: {source}")]
    Finalize {
        id: QueueId,
        #[source]
        source: StoreError,
    },
}

impl DeliveryError {
    /// Returns `true` if the underlying store was unreachable or too slow,
    /// as opposed to rejecting the operation
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        let (Self::Store(source) | Self::Finalize { source, .. }) = self;
        matches!(
            source,
            StoreError::Unavailable(_) | StoreError::Timeout(_) | StoreError::Io(_)
        )
    }

    /// Returns `true` if the attempt was resolved against a copy of the
    /// record that another attempt had already advanced
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict { .. }))
    }

    /// The queue record a failed finalization left behind
    #[must_use]
    pub const fn kept_record(&self) -> Option<&QueueId> {
        match self {
            Self::Finalize { id, .. } => Some(id),
            Self::Store(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
