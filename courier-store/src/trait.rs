use std::{cmp::Ordering, time::SystemTime};

use async_trait::async_trait;

use crate::{
    Result,
    record::{AttemptUpdate, DeliveryStatus, QueuedMessage},
    types::QueueId,
};

/// Which queue records a selection is after
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criteria {
    /// Never attempted (`repeat_count == 0`)
    New,
    /// Attempted before and last touched before the given instant
    DueForRetry { updated_before: SystemTime },
}

impl Criteria {
    #[must_use]
    pub fn matches(&self, record: &QueuedMessage) -> bool {
        match self {
            Self::New => record.repeat_count == 0,
            Self::DueForRetry { updated_before } => {
                record.repeat_count > 0 && record.updated_at < *updated_before
            }
        }
    }
}

/// A filtered select over the queue table
#[derive(Debug, Clone)]
pub struct Selection {
    pub criteria: Criteria,
    /// Records to skip, typically the ones currently leased
    pub exclude: Vec<QueueId>,
    pub limit: usize,
}

impl Selection {
    #[must_use]
    pub const fn new(criteria: Criteria, limit: usize) -> Self {
        Self {
            criteria,
            exclude: Vec::new(),
            limit,
        }
    }

    #[must_use]
    pub fn excluding(mut self, exclude: Vec<QueueId>) -> Self {
        self.exclude = exclude;
        self
    }

    #[must_use]
    pub fn matches(&self, record: &QueuedMessage) -> bool {
        self.criteria.matches(record) && !self.exclude.contains(&record.id)
    }

    /// The order every backend returns selections in: least recently touched
    /// first, ties broken by id
    #[must_use]
    pub fn ordering(a: &QueuedMessage, b: &QueuedMessage) -> Ordering {
        a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id))
    }
}

/// Storage for the queue table
///
/// Implementations need only be durable per call: each method is a single
/// atomic change (or read) of one record, or a read-only filtered select.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, record: &QueuedMessage) -> Result<()>;

    /// Read a record, including its payload
    async fn read(&self, id: &QueueId) -> Result<QueuedMessage>;

    /// Up to `selection.limit` matching records, in [`Selection::ordering`]
    async fn select(&self, selection: &Selection) -> Result<Vec<QueuedMessage>>;

    /// Persist the attempt columns of a record, and nothing else
    ///
    /// Fails with `Conflict`, leaving the record untouched, unless
    /// `update.repeat_count` is above the stored count.
    async fn record_attempt(&self, id: &QueueId, update: &AttemptUpdate) -> Result<()>;

    /// Remove a record. Fails with `NotFound` if it is not present.
    async fn delete(&self, id: &QueueId) -> Result<()>;

    /// Number of records in the store
    async fn count(&self) -> Result<usize>;
}

/// Result of appending to the status table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    Inserted,
    /// A status for the same queue record already existed and was kept as is
    AlreadyRecorded,
}

/// Storage for the append-only status table
#[async_trait]
pub trait StatusBackingStore: Send + Sync + std::fmt::Debug {
    /// Append a status. Never overwrites an existing row for the same queue id.
    async fn append(&self, status: &DeliveryStatus) -> Result<Appended>;

    /// The status recorded for a queue record, if any
    async fn get(&self, queue_id: &QueueId) -> Result<Option<DeliveryStatus>>;

    /// Every recorded status, oldest resolution first
    async fn list(&self) -> Result<Vec<DeliveryStatus>>;
}
