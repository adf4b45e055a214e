use std::sync::Arc;

use courier_common::{Address, OutcomeCode, internal};
use courier_delivery::{DeliveryError, Resolved, StatusResolver};
use courier_store::{DeliveryStatus, EnqueueReport, QueueId, QueuedMessage, StoreError};

use crate::config::BatchConfig;

/// The queue and status stores, wired together behind the operations the
/// protocol front end, the scheduler, and the transmission engine use
#[derive(Debug, Clone)]
pub struct Relay {
    resolver: StatusResolver,
    batch: BatchConfig,
}

impl Relay {
    #[must_use]
    pub const fn new(resolver: StatusResolver, batch: BatchConfig) -> Self {
        Self { resolver, batch }
    }

    #[must_use]
    pub const fn resolver(&self) -> &StatusResolver {
        &self.resolver
    }

    #[must_use]
    pub const fn batch(&self) -> &BatchConfig {
        &self.batch
    }

    /// Accept a message for delivery to each of `recipients`
    pub async fn enqueue(
        &self,
        message_type: &str,
        message_id: &str,
        from: &Address,
        recipients: &[Address],
        payload: impl Into<Arc<[u8]>>,
    ) -> EnqueueReport {
        let report = self
            .resolver
            .queue()
            .enqueue(message_type, message_id, from, recipients, payload)
            .await;

        internal!(
            level = INFO,
            "Queued {} of {} recipients for {message_id}",
            report.queued.len(),
            recipients.len()
        );

        report
    }

    /// Claim a batch of first attempts, at most `send_stream` unless a
    /// smaller `limit` is given
    ///
    /// # Errors
    /// If the queue store fails or times out
    pub async fn select_new(&self, limit: Option<usize>) -> Result<Vec<QueuedMessage>, StoreError> {
        let limit = limit.map_or(self.batch.send_stream, |limit| limit.min(self.batch.send_stream));
        self.resolver.queue().select_new(limit).await
    }

    /// Claim a batch of retries, at most `resend_stream` unless a smaller
    /// `limit` is given
    ///
    /// # Errors
    /// If the queue store fails or times out
    pub async fn select_due(&self, limit: Option<usize>) -> Result<Vec<QueuedMessage>, StoreError> {
        let limit = limit.map_or(self.batch.resend_stream, |limit| {
            limit.min(self.batch.resend_stream)
        });
        self.resolver.queue().select_due_for_retry(limit).await
    }

    /// Give up the claims on records that will not be attempted after all
    pub fn release<'a>(&self, records: impl IntoIterator<Item = &'a QueuedMessage>) {
        for record in records {
            self.resolver.queue().release(&record.id);
        }
    }

    /// Feed the outcome of an attempt on a queued record back into the queue
    ///
    /// # Errors
    /// If the record is not queued, or resolving it fails
    pub async fn report(&self, id: &QueueId, outcome: OutcomeCode) -> Result<Resolved, DeliveryError> {
        let record = self
            .resolver
            .queue()
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        self.resolver.resolve(record, outcome).await
    }

    /// Every recorded delivery status, oldest resolution first
    ///
    /// # Errors
    /// If the status store fails or times out
    pub async fn statuses(&self) -> Result<Vec<DeliveryStatus>, StoreError> {
        self.resolver.statuses().list().await
    }
}
