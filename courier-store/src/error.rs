//! Error types for the courier-store crate.
//!
//! Every store operation returns [`StoreError`]. From the point of view of the
//! queue logic all of these mean "the store is unavailable": the operation did
//! not happen and the caller decides whether to try again later.

use std::{io, time::Duration};

use thiserror::Error;

use crate::QueueId;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Record not found in the store.
    #[error("Record not found: {0}")]
    NotFound(QueueId),

    /// Record already exists in the store.
    #[error("Record already exists: {0}")]
    AlreadyExists(QueueId),

    /// The update was made against an older copy of the record than the
    /// one stored.
    #[error("Stale update for {id}: stored repeat count {stored}, update carries {attempted}")]
    Conflict {
        id: QueueId,
        stored: u32,
        attempted: u32,
    },

    /// Store path or configuration validation failed.
    #[error("Store validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The store did not answer within the configured timeout.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store refused the write (capacity, injected failure, ...).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Bincode serialization failed.
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Bincode deserialization failed.
    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Store directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Store path is not a directory.
    #[error("Store path is not a directory: {0}")]
    NotDirectory(String),

    /// Invalid store configuration.
    #[error("Invalid store configuration: {0}")]
    InvalidConfiguration(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<bincode::error::EncodeError> for StoreError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.into())
    }
}

// Convenience conversion for lock poisoning
impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl StoreError {
    /// Returns `true` if the error only says the record is missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if a retry update lost to a newer attempt.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Io(_)));
    }

    #[test]
    fn test_error_chain() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let store_err = StoreError::from(io_err);

        assert!(matches!(store_err, StoreError::Io(_)));
        assert!(store_err.to_string().contains("access denied"));
    }

    #[test]
    fn test_not_found() {
        let err = StoreError::NotFound(QueueId::generate());
        assert!(err.is_not_found());
        assert!(!StoreError::Timeout(Duration::from_secs(1)).is_not_found());
    }

    #[test]
    fn test_conflict() {
        let err = StoreError::Conflict {
            id: QueueId::generate(),
            stored: 2,
            attempted: 1,
        };
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("stored repeat count 2"));
    }
}
