use std::{fmt, sync::Arc, time::SystemTime};

use courier_common::Address;
use serde::{Deserialize, Serialize};

use crate::{StoreError, types::QueueId};

/// A pending delivery of one message to one recipient.
///
/// Created by enqueue with a zero repeat count, advanced in place after each
/// transiently failed attempt, and destroyed when it is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: QueueId,
    pub created_at: SystemTime,
    /// Advanced on every retry decision
    pub updated_at: SystemTime,
    pub message_type: String,
    /// Correlation id of the accepted message, shared by all its recipients
    pub message_id: String,
    pub from: String,
    pub from_domain: String,
    pub recipient: String,
    pub recipient_domain: String,
    /// Raw message bytes. Stored apart from the metadata by the file backend.
    #[serde(skip)]
    pub payload: Arc<[u8]>,
    /// Delivery attempts already made
    pub repeat_count: u32,
    /// Reply code of the most recent failed attempt, empty until attempted
    pub pending_outcome: String,
}

impl QueuedMessage {
    #[must_use]
    pub fn new(
        message_type: impl Into<String>,
        message_id: impl Into<String>,
        from: &Address,
        recipient: &Address,
        payload: Arc<[u8]>,
    ) -> Self {
        let now = SystemTime::now();

        Self {
            id: QueueId::generate(),
            created_at: now,
            updated_at: now,
            message_type: message_type.into(),
            message_id: message_id.into(),
            from: from.email(),
            from_domain: from.domain().to_string(),
            recipient: recipient.email(),
            recipient_domain: recipient.domain().to_string(),
            payload,
            repeat_count: 0,
            pending_outcome: String::new(),
        }
    }

    /// Is this record still awaiting its first attempt?
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.repeat_count == 0
    }

    /// Apply an attempt update unless it was made against an older copy
    ///
    /// The repeat count never goes backwards: an update whose count is not
    /// above the stored one lost to a newer attempt and is rejected.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if the update is stale
    pub fn advance(&mut self, update: &AttemptUpdate) -> crate::Result<()> {
        if update.repeat_count <= self.repeat_count {
            return Err(StoreError::Conflict {
                id: self.id.clone(),
                stored: self.repeat_count,
                attempted: update.repeat_count,
            });
        }

        self.apply(update);
        Ok(())
    }

    /// Apply the columns of an attempt update, leaving everything else alone
    pub fn apply(&mut self, update: &AttemptUpdate) {
        self.repeat_count = update.repeat_count;
        self.pending_outcome.clone_from(&update.pending_outcome);
        self.updated_at = update.updated_at;
    }
}

/// The only columns a retry decision is allowed to change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptUpdate {
    pub repeat_count: u32,
    pub pending_outcome: String,
    pub updated_at: SystemTime,
}

/// How a record was ultimately resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// The remote server accepted the message
    Delivered,
    /// Permanent (or unclassifiable) failure
    Failed,
    /// The retry ceiling was reached
    Expired,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delivered => "Delivered",
            Self::Failed => "Failed",
            Self::Expired => "Expired",
        })
    }
}

/// Terminal record of a resolved delivery. Written once, never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// The queue record this status resolves; at most one status per id
    pub queue_id: QueueId,
    pub queued_at: SystemTime,
    pub resolved_at: SystemTime,
    pub from: String,
    pub recipient: String,
    pub message_type: String,
    pub message_id: String,
    /// The reply code of the final attempt
    pub outcome: String,
    pub resolution: Resolution,
}

impl DeliveryStatus {
    #[must_use]
    pub fn resolve(record: &QueuedMessage, resolution: Resolution, resolved_at: SystemTime) -> Self {
        Self {
            queue_id: record.id.clone(),
            queued_at: record.created_at,
            resolved_at,
            from: record.from.clone(),
            recipient: record.recipient.clone(),
            message_type: record.message_type.clone(),
            message_id: record.message_id.clone(),
            outcome: record.pending_outcome.clone(),
            resolution,
        }
    }
}
