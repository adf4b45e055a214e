use std::time::SystemTime;

use courier_common::{Classification, OutcomeCode, audit::Auditor};
use courier_store::{
    Appended, DeliveryStatus, QueueStore, QueuedMessage, Resolution, StatusStore,
};

use crate::{
    error::{DeliveryError, Result},
    policy::{Decision, RetryPolicy},
};

/// What became of a record after an attempt was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Still queued, to be picked up again once the retry interval has passed
    Retrying { repeat_count: u32 },
    /// Moved to the status store and removed from the queue
    Finalized {
        status: DeliveryStatus,
        repeat_count: u32,
    },
}

impl Resolved {
    #[must_use]
    pub const fn repeat_count(&self) -> u32 {
        match self {
            Self::Retrying { repeat_count } | Self::Finalized { repeat_count, .. } => *repeat_count,
        }
    }

    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized { .. })
    }
}

/// Feeds attempt outcomes back into the queue
///
/// Each outcome either schedules another attempt, updating the record in
/// place, or finalizes the record: its status is written first and only then
/// is it removed from the queue.
#[derive(Debug, Clone)]
pub struct StatusResolver {
    queue: QueueStore,
    statuses: StatusStore,
    policy: RetryPolicy,
    auditor: Auditor,
}

impl StatusResolver {
    #[must_use]
    pub fn new(queue: QueueStore, statuses: StatusStore, policy: RetryPolicy) -> Self {
        Self {
            queue,
            statuses,
            policy,
            auditor: Auditor::default(),
        }
    }

    #[must_use]
    pub fn with_auditor(mut self, auditor: Auditor) -> Self {
        self.auditor = auditor;
        self
    }

    #[must_use]
    pub const fn queue(&self) -> &QueueStore {
        &self.queue
    }

    #[must_use]
    pub const fn statuses(&self) -> &StatusStore {
        &self.statuses
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Resolve the outcome of the latest attempt of `record`
    ///
    /// # Errors
    /// If the retry update or the finalization fails. A failed status write
    /// is reported as [`DeliveryError::Finalize`] and leaves the record
    /// queued. A retry update against a copy that another attempt already
    /// advanced is rejected (see [`DeliveryError::is_stale`]) and its claim
    /// released.
    #[tracing::instrument(level = "debug", skip_all, fields(id = %record.id, outcome = %outcome))]
    pub async fn resolve(&self, mut record: QueuedMessage, outcome: OutcomeCode) -> Result<Resolved> {
        record.repeat_count = record.repeat_count.saturating_add(1);
        record.pending_outcome = outcome.code().to_string();
        record.updated_at = SystemTime::now();

        if outcome.classification() == Classification::Unknown {
            tracing::warn!(
                id = %record.id,
                code = %outcome.code(),
                "Unclassifiable outcome code, finalizing as failed"
            );
        }

        match self.policy.decide(record.repeat_count, outcome.classification()) {
            Decision::Retry => {
                self.queue.update_for_retry(&record).await?;
                self.auditor.retry_scheduled(
                    &record.id.to_string(),
                    &record.recipient,
                    outcome.code(),
                    record.repeat_count,
                );

                tracing::debug!(
                    id = %record.id,
                    repeat_count = record.repeat_count,
                    remaining = self.policy.remaining_attempts(record.repeat_count),
                    "Retry scheduled"
                );

                Ok(Resolved::Retrying {
                    repeat_count: record.repeat_count,
                })
            }
            Decision::Finalize(resolution) => {
                let status = self.finalize(&record, resolution).await?;

                Ok(Resolved::Finalized {
                    status,
                    repeat_count: record.repeat_count,
                })
            }
        }
    }

    /// Write the status row for `record`, then remove it from the queue
    ///
    /// Finalizing the same record again is harmless: the first status row is
    /// kept (and returned), and the missing queue record is ignored.
    ///
    /// # Errors
    /// [`DeliveryError::Finalize`] if the status could not be written, in
    /// which case the record stays queued and its claim is released.
    /// [`DeliveryError::Store`] if the status was written but the record
    /// could not be removed; finalizing again completes the removal.
    #[tracing::instrument(level = "debug", skip_all, fields(id = %record.id, resolution = %resolution))]
    pub async fn finalize(
        &self,
        record: &QueuedMessage,
        resolution: Resolution,
    ) -> Result<DeliveryStatus> {
        let status = DeliveryStatus::resolve(record, resolution, SystemTime::now());

        let appended = match self.statuses.record(&status).await {
            Ok(appended) => appended,
            Err(source) => {
                self.queue.release(&record.id);
                tracing::error!(
                    id = %record.id,
                    error = %source,
                    "Failed to record delivery status, keeping queue record"
                );
                return Err(DeliveryError::Finalize {
                    id: record.id.clone(),
                    source,
                });
            }
        };

        if !self.queue.remove(&record.id).await? {
            tracing::debug!(id = %record.id, "Queue record already removed");
        }

        match appended {
            Appended::Inserted => {
                self.auditor.finalized(
                    &record.id.to_string(),
                    &record.recipient,
                    &record.pending_outcome,
                    &resolution.to_string(),
                    record.repeat_count,
                );
                Ok(status)
            }
            Appended::AlreadyRecorded => Ok(self.statuses.get(&record.id).await?.unwrap_or(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use courier_common::Address;
    use courier_store::{MemoryBackingStore, MemoryStatusStore, QueueOptions};

    use super::*;

    async fn setup() -> (StatusResolver, QueuedMessage) {
        let queue = QueueStore::new(Arc::new(MemoryBackingStore::new()), QueueOptions::default());
        let statuses = StatusStore::new(Arc::new(MemoryStatusStore::new()), Duration::from_secs(1));

        queue
            .enqueue(
                "mail",
                "msg-1",
                &Address::new("sender", "example.com"),
                &[Address::new("rcpt", "example.org")],
                b"data".as_slice(),
            )
            .await;
        let record = queue
            .select_new(1)
            .await
            .expect("select")
            .pop()
            .expect("one record");

        (StatusResolver::new(queue, statuses, RetryPolicy::default()), record)
    }

    #[tokio::test]
    async fn unknown_code_finalizes_as_failed() {
        let (resolver, record) = setup().await;

        let resolved = resolver
            .resolve(record, OutcomeCode::new("xyz"))
            .await
            .expect("resolve");

        match resolved {
            Resolved::Finalized {
                status,
                repeat_count,
            } => {
                assert_eq!(status.resolution, Resolution::Failed);
                assert_eq!(status.outcome, "xyz");
                assert_eq!(repeat_count, 1);
            }
            Resolved::Retrying { .. } => panic!("unknown code must not be retried"),
        }
    }

    #[tokio::test]
    async fn retry_releases_the_claim() {
        let (resolver, record) = setup().await;
        let id = record.id.clone();
        assert!(resolver.queue().is_claimed(&id));

        let resolved = resolver
            .resolve(record, OutcomeCode::new("451"))
            .await
            .expect("resolve");

        assert_eq!(resolved, Resolved::Retrying { repeat_count: 1 });
        assert!(!resolver.queue().is_claimed(&id));
    }
}
