use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use super::memory::{MemoryBackingStore, MemoryStatusStore};
use crate::{
    StoreError,
    record::{AttemptUpdate, DeliveryStatus, QueuedMessage},
    r#trait::{Appended, BackingStore, Selection, StatusBackingStore},
    types::QueueId,
};

/// Queue table for tests
///
/// Wraps a [`MemoryBackingStore`] and can be told to reject inserts for
/// particular recipients, reject every write, or answer slowly.
#[derive(Debug, Clone, Default)]
pub struct TestBackingStore {
    pub(crate) inner: MemoryBackingStore,
    failing_recipients: Arc<Mutex<HashSet<String>>>,
    fail_writes: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
}

impl TestBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts of records addressed to `recipient`
    ///
    /// # Panics
    /// Panics if the mutex is poisoned
    pub fn fail_recipient(&self, recipient: impl Into<String>) {
        self.failing_recipients
            .lock()
            .expect("TestBackingStore recipients mutex poisoned")
            .insert(recipient.into());
    }

    /// Reject (or stop rejecting) every insert, update and delete
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every operation by `delay`
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(
            u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            Ordering::SeqCst,
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    async fn pause(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn check_write(&self) -> crate::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("writes disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BackingStore for TestBackingStore {
    async fn insert(&self, record: &QueuedMessage) -> crate::Result<()> {
        self.pause().await;
        self.check_write()?;

        let rejected = self
            .failing_recipients
            .lock()?
            .contains(&record.recipient);
        if rejected {
            return Err(StoreError::Unavailable(format!(
                "insert rejected for {}",
                record.recipient
            )));
        }

        self.inner.insert(record).await
    }

    async fn read(&self, id: &QueueId) -> crate::Result<QueuedMessage> {
        self.pause().await;
        self.inner.read(id).await
    }

    async fn select(&self, selection: &Selection) -> crate::Result<Vec<QueuedMessage>> {
        self.pause().await;
        self.inner.select(selection).await
    }

    async fn record_attempt(&self, id: &QueueId, update: &AttemptUpdate) -> crate::Result<()> {
        self.pause().await;
        self.check_write()?;
        self.inner.record_attempt(id, update).await
    }

    async fn delete(&self, id: &QueueId) -> crate::Result<()> {
        self.pause().await;
        self.check_write()?;
        self.inner.delete(id).await
    }

    async fn count(&self) -> crate::Result<usize> {
        self.inner.count().await
    }
}

/// Status table for tests, whose appends can be switched to fail
#[derive(Debug, Clone, Default)]
pub struct TestStatusStore {
    pub(crate) inner: MemoryStatusStore,
    fail_appends: Arc<AtomicBool>,
    appends: Arc<AtomicU64>,
}

impl TestStatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Number of append calls that reached the store, successful or not
    #[must_use]
    pub fn append_calls(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl StatusBackingStore for TestStatusStore {
    async fn append(&self, status: &DeliveryStatus) -> crate::Result<Appended> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("status store offline".to_string()));
        }
        self.inner.append(status).await
    }

    async fn get(&self, queue_id: &QueueId) -> crate::Result<Option<DeliveryStatus>> {
        self.inner.get(queue_id).await
    }

    async fn list(&self) -> crate::Result<Vec<DeliveryStatus>> {
        self.inner.list().await
    }
}
