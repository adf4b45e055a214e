use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{
    StoreError,
    record::{AttemptUpdate, DeliveryStatus, QueuedMessage},
    r#trait::{Appended, BackingStore, Selection, StatusBackingStore},
    types::QueueId,
};

/// In-memory queue table
///
/// Records live in a `HashMap` behind an `RwLock`. Intended for tests and
/// for relays that accept losing the queue on restart.
///
/// # Capacity Management
/// The store can be configured with a maximum number of records. Once it is
/// full, inserts fail with [`StoreError::Unavailable`] until something is
/// removed, which keeps an unbounded backlog from exhausting memory.
#[derive(Debug, Clone)]
pub struct MemoryBackingStore {
    pub(crate) records: Arc<RwLock<HashMap<QueueId, QueuedMessage>>>,
    /// Maximum number of records to store (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryBackingStore {
    /// Create a new empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            capacity: None,
        }
    }

    /// Create a new store holding at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            capacity: Some(capacity),
        }
    }

    /// Current number of records
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the configured capacity (None = unlimited)
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn insert(&self, record: &QueuedMessage) -> crate::Result<()> {
        let mut records = self.records.write()?;

        if let Some(cap) = self.capacity {
            if records.len() >= cap {
                return Err(StoreError::Unavailable(format!(
                    "Memory queue capacity exceeded: {}/{cap} records",
                    records.len()
                )));
            }
        }

        match records.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(record.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn read(&self, id: &QueueId) -> crate::Result<QueuedMessage> {
        self.records
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn select(&self, selection: &Selection) -> crate::Result<Vec<QueuedMessage>> {
        let mut matching: Vec<_> = self
            .records
            .read()?
            .values()
            .filter(|record| selection.matches(record))
            .cloned()
            .collect();

        matching.sort_by(Selection::ordering);
        matching.truncate(selection.limit);

        Ok(matching)
    }

    async fn record_attempt(&self, id: &QueueId, update: &AttemptUpdate) -> crate::Result<()> {
        self.records
            .write()?
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?
            .advance(update)
    }

    async fn delete(&self, id: &QueueId) -> crate::Result<()> {
        self.records
            .write()?
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(())
    }

    async fn count(&self) -> crate::Result<usize> {
        Ok(self.records.read()?.len())
    }
}

/// In-memory status table, keyed by the queue record it resolves
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    pub(crate) statuses: Arc<RwLock<HashMap<QueueId, DeliveryStatus>>>,
}

impl MemoryStatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StatusBackingStore for MemoryStatusStore {
    async fn append(&self, status: &DeliveryStatus) -> crate::Result<Appended> {
        match self.statuses.write()?.entry(status.queue_id.clone()) {
            Entry::Occupied(_) => Ok(Appended::AlreadyRecorded),
            Entry::Vacant(slot) => {
                slot.insert(status.clone());
                Ok(Appended::Inserted)
            }
        }
    }

    async fn get(&self, queue_id: &QueueId) -> crate::Result<Option<DeliveryStatus>> {
        Ok(self.statuses.read()?.get(queue_id).cloned())
    }

    async fn list(&self) -> crate::Result<Vec<DeliveryStatus>> {
        let mut statuses: Vec<_> = self.statuses.read()?.values().cloned().collect();
        statuses.sort_by(|a, b| {
            a.resolved_at
                .cmp(&b.resolved_at)
                .then_with(|| a.queue_id.cmp(&b.queue_id))
        });
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, SystemTime},
    };

    use courier_common::Address;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{record::Resolution, r#trait::Criteria};

    fn record(rcpt: &str) -> QueuedMessage {
        QueuedMessage::new(
            "mail",
            "msg-1",
            &Address::new("sender", "example.com"),
            &rcpt.parse().expect("valid address"),
            Arc::from(b"data".as_slice()),
        )
    }

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryBackingStore::new();
        let record = record("a@example.org");

        store.insert(&record).await.expect("Failed to insert");
        assert!(matches!(
            store.insert(&record).await,
            Err(StoreError::AlreadyExists(_))
        ));

        let read = store.read(&record.id).await.expect("Failed to read");
        assert_eq!(read, record);
        assert_eq!(store.count().await.expect("Failed to count"), 1);

        store.delete(&record.id).await.expect("Failed to delete");
        assert!(store.is_empty());
        assert!(matches!(
            store.delete(&record.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_capacity_limit() {
        let store = MemoryBackingStore::with_capacity(2);
        assert_eq!(store.capacity(), Some(2));

        let first = record("a@example.org");
        store.insert(&first).await.expect("First insert should succeed");
        store
            .insert(&record("b@example.org"))
            .await
            .expect("Second insert should succeed");

        let result = store.insert(&record("c@example.org")).await;
        assert!(
            result
                .expect_err("Third insert should fail")
                .to_string()
                .contains("capacity exceeded")
        );

        store.delete(&first.id).await.expect("Failed to delete");
        assert!(store.insert(&record("c@example.org")).await.is_ok());
    }

    #[tokio::test]
    async fn test_select_filters_and_orders() {
        let store = MemoryBackingStore::new();
        let now = SystemTime::now();

        let fresh = record("new@example.org");
        let mut stale = record("stale@example.org");
        stale.repeat_count = 1;
        stale.updated_at = now - Duration::from_secs(3600);
        let mut staler = record("staler@example.org");
        staler.repeat_count = 2;
        staler.updated_at = now - Duration::from_secs(7200);
        let mut recent = record("recent@example.org");
        recent.repeat_count = 1;
        recent.updated_at = now;

        for r in [&fresh, &stale, &staler, &recent] {
            store.insert(r).await.expect("Failed to insert");
        }

        let new = store
            .select(&Selection::new(Criteria::New, 10))
            .await
            .expect("Failed to select");
        assert_eq!(new, vec![fresh]);

        let due = store
            .select(&Selection::new(
                Criteria::DueForRetry {
                    updated_before: now - Duration::from_secs(60),
                },
                10,
            ))
            .await
            .expect("Failed to select");
        let ids: Vec<_> = due.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![staler.id.clone(), stale.id.clone()]);

        let limited = store
            .select(
                &Selection::new(
                    Criteria::DueForRetry {
                        updated_before: now - Duration::from_secs(60),
                    },
                    1,
                )
                .excluding(vec![staler.id.clone()]),
            )
            .await
            .expect("Failed to select");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, stale.id);
    }

    #[tokio::test]
    async fn test_record_attempt() {
        let store = MemoryBackingStore::new();
        let record = record("a@example.org");
        store.insert(&record).await.expect("Failed to insert");

        let update = AttemptUpdate {
            repeat_count: 1,
            pending_outcome: "451".to_string(),
            updated_at: SystemTime::now(),
        };
        store
            .record_attempt(&record.id, &update)
            .await
            .expect("Failed to update");

        let read = store.read(&record.id).await.expect("Failed to read");
        assert_eq!(read.repeat_count, 1);
        assert_eq!(read.pending_outcome, "451");
        assert_eq!(read.payload, record.payload);

        let missing = QueueId::generate();
        assert!(matches!(
            store.record_attempt(&missing, &update).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_record_attempt_never_lowers_repeat_count() {
        let store = MemoryBackingStore::new();
        let record = record("a@example.org");
        store.insert(&record).await.expect("Failed to insert");

        let newer = AttemptUpdate {
            repeat_count: 2,
            pending_outcome: "421".to_string(),
            updated_at: SystemTime::now(),
        };
        store
            .record_attempt(&record.id, &newer)
            .await
            .expect("Failed to update");

        let stale = AttemptUpdate {
            repeat_count: 1,
            pending_outcome: "450".to_string(),
            updated_at: SystemTime::now(),
        };
        assert!(matches!(
            store.record_attempt(&record.id, &stale).await,
            Err(StoreError::Conflict {
                stored: 2,
                attempted: 1,
                ..
            })
        ));

        let read = store.read(&record.id).await.expect("Failed to read");
        assert_eq!(read.repeat_count, 2);
        assert_eq!(read.pending_outcome, "421");
    }

    #[tokio::test]
    async fn test_status_store_is_append_only() {
        let store = MemoryStatusStore::new();
        let mut record = record("a@example.org");
        record.pending_outcome = "250".to_string();

        let first = DeliveryStatus::resolve(&record, Resolution::Delivered, SystemTime::now());
        assert_eq!(
            store.append(&first).await.expect("Failed to append"),
            Appended::Inserted
        );

        let mut second = first.clone();
        second.outcome = "550".to_string();
        assert_eq!(
            store.append(&second).await.expect("Failed to append"),
            Appended::AlreadyRecorded
        );

        let kept = store
            .get(&record.id)
            .await
            .expect("Failed to get")
            .expect("status should exist");
        assert_eq!(kept.outcome, "250");
        assert_eq!(store.list().await.expect("Failed to list").len(), 1);
    }
}
