use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use courier_common::{Address, audit::Auditor, internal};
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    StoreError,
    record::{AttemptUpdate, QueuedMessage},
    r#trait::{BackingStore, Criteria, Selection},
    types::QueueId,
};

/// Tunables for a [`QueueStore`]
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Minimum spacing between two attempts of the same record
    pub retry_interval: Duration,
    /// How long a selected record stays claimed without being updated or
    /// removed before another selection may hand it out again
    pub lease: Duration,
    /// Upper bound on every backing store call
    pub timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(15 * 60),
            lease: Duration::from_secs(10 * 60),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of enqueueing one accepted message
///
/// Recipients are independent: a failed insert for one never prevents the
/// others from being queued.
#[derive(Debug, Default)]
pub struct EnqueueReport {
    pub queued: Vec<QueueId>,
    pub failed: Vec<(Address, StoreError)>,
}

impl EnqueueReport {
    /// Were all recipients queued?
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The queue of records still awaiting delivery
///
/// Selections claim what they return: a claimed record is not handed out
/// again until it is updated, removed, released, or its lease runs out, so
/// concurrent workers sharing a `QueueStore` never attempt the same record at
/// the same time.
#[derive(Debug, Clone)]
pub struct QueueStore {
    backend: Arc<dyn BackingStore>,
    /// Claimed records and when their claim lapses
    leases: Arc<DashMap<QueueId, Instant>>,
    options: QueueOptions,
    auditor: Auditor,
}

impl QueueStore {
    #[must_use]
    pub fn new(backend: Arc<dyn BackingStore>, options: QueueOptions) -> Self {
        Self {
            backend,
            leases: Arc::new(DashMap::new()),
            options,
            auditor: Auditor::default(),
        }
    }

    #[must_use]
    pub fn with_auditor(mut self, auditor: Auditor) -> Self {
        self.auditor = auditor;
        self
    }

    #[must_use]
    pub const fn options(&self) -> &QueueOptions {
        &self.options
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = crate::Result<T>>,
    ) -> crate::Result<T> {
        tokio::time::timeout(self.options.timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.options.timeout))?
    }

    /// Queue one record per recipient of an accepted message
    ///
    /// Every record starts with a zero repeat count. Failures are collected
    /// per recipient in the returned report rather than surfaced as an error.
    #[tracing::instrument(level = "debug", skip_all, fields(message_id = %message_id, recipients = recipients.len()))]
    pub async fn enqueue(
        &self,
        message_type: &str,
        message_id: &str,
        from: &Address,
        recipients: &[Address],
        payload: impl Into<Arc<[u8]>>,
    ) -> EnqueueReport {
        let payload = payload.into();
        let mut report = EnqueueReport::default();

        for recipient in recipients {
            let record = QueuedMessage::new(
                message_type,
                message_id,
                from,
                recipient,
                Arc::clone(&payload),
            );

            match self.bounded(self.backend.insert(&record)).await {
                Ok(()) => {
                    self.auditor.enqueued(
                        &record.id.to_string(),
                        message_id,
                        &record.from,
                        &record.recipient,
                        payload.len(),
                    );
                    report.queued.push(record.id);
                }
                Err(err) => {
                    tracing::warn!(
                        message_id = %message_id,
                        recipient = %recipient,
                        error = %err,
                        "Failed to queue recipient"
                    );
                    report.failed.push((recipient.clone(), err));
                }
            }
        }

        report
    }

    /// Claim up to `limit` records that have never been attempted
    ///
    /// # Errors
    /// If the backing store fails or times out
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn select_new(&self, limit: usize) -> crate::Result<Vec<QueuedMessage>> {
        self.select(Criteria::New, limit).await
    }

    /// Claim up to `limit` previously attempted records whose last attempt is
    /// older than the retry interval, least recently attempted first
    ///
    /// # Errors
    /// If the backing store fails or times out
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn select_due_for_retry(&self, limit: usize) -> crate::Result<Vec<QueuedMessage>> {
        let updated_before = SystemTime::now()
            .checked_sub(self.options.retry_interval)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        self.select(Criteria::DueForRetry { updated_before }, limit)
            .await
    }

    async fn select(&self, criteria: Criteria, limit: usize) -> crate::Result<Vec<QueuedMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = Instant::now();
        self.leases.retain(|_, expires| *expires > now);
        let claimed = self.leases.iter().map(|lease| lease.key().clone()).collect();

        let selection = Selection::new(criteria, limit).excluding(claimed);
        let candidates = self.bounded(self.backend.select(&selection)).await?;

        let expires = now + self.options.lease;
        let selected: Vec<_> = candidates
            .into_iter()
            .filter(|record| match self.leases.entry(record.id.clone()) {
                // Claimed by a concurrent selection since we looked
                Entry::Occupied(lease) if *lease.get() > now => false,
                Entry::Occupied(mut lease) => {
                    lease.insert(expires);
                    true
                }
                Entry::Vacant(slot) => {
                    slot.insert(expires);
                    true
                }
            })
            .collect();

        internal!(level = DEBUG, "Claimed {} records", selected.len());

        Ok(selected)
    }

    /// Persist the attempt columns of a record that stays queued, and release
    /// its claim
    ///
    /// Only `repeat_count`, `pending_outcome` and `updated_at` are written,
    /// and only if `record` carries a higher repeat count than the stored
    /// copy. On a store failure the claim is kept, so the record is not
    /// handed out again before its lease runs out.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if another attempt already advanced the
    /// record past this copy; the claim is released in that case. Otherwise
    /// if the record is gone, or the backing store fails or times out.
    #[tracing::instrument(level = "debug", skip_all, fields(id = %record.id, repeat_count = record.repeat_count))]
    pub async fn update_for_retry(&self, record: &QueuedMessage) -> crate::Result<()> {
        let update = AttemptUpdate {
            repeat_count: record.repeat_count,
            pending_outcome: record.pending_outcome.clone(),
            updated_at: record.updated_at,
        };

        match self
            .bounded(self.backend.record_attempt(&record.id, &update))
            .await
        {
            Ok(()) => {
                self.release(&record.id);
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                self.release(&record.id);
                tracing::warn!(id = %record.id, error = %err, "Discarding stale retry update");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Remove a record and release its claim
    ///
    /// Returns `false` if the record was already gone.
    ///
    /// # Errors
    /// If the backing store fails or times out
    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn remove(&self, id: &QueueId) -> crate::Result<bool> {
        let removed = match self.bounded(self.backend.delete(id)).await {
            Ok(()) => true,
            Err(StoreError::NotFound(_)) => false,
            Err(err) => return Err(err),
        };

        self.release(id);

        Ok(removed)
    }

    /// Give up a claim without changing the record
    pub fn release(&self, id: &QueueId) {
        self.leases.remove(id);
    }

    /// Is the record currently claimed by a selection?
    #[must_use]
    pub fn is_claimed(&self, id: &QueueId) -> bool {
        self.leases
            .get(id)
            .is_some_and(|expires| *expires > Instant::now())
    }

    /// # Errors
    /// If the backing store fails or times out
    pub async fn get(&self, id: &QueueId) -> crate::Result<Option<QueuedMessage>> {
        match self.bounded(self.backend.read(id)).await {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Number of queued records
    ///
    /// # Errors
    /// If the backing store fails or times out
    pub async fn len(&self) -> crate::Result<usize> {
        self.bounded(self.backend.count()).await
    }

    /// # Errors
    /// If the backing store fails or times out
    pub async fn is_empty(&self) -> crate::Result<bool> {
        Ok(self.len().await? == 0)
    }
}
