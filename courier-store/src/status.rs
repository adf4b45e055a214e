use std::{sync::Arc, time::Duration};

use crate::{
    StoreError,
    record::DeliveryStatus,
    r#trait::{Appended, StatusBackingStore},
    types::QueueId,
};

/// The append-only table of terminal delivery statuses
#[derive(Debug, Clone)]
pub struct StatusStore {
    backend: Arc<dyn StatusBackingStore>,
    timeout: Duration,
}

impl StatusStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StatusBackingStore>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = crate::Result<T>>,
    ) -> crate::Result<T> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    /// Append a status row
    ///
    /// Recording a second status for the same queue record keeps the first
    /// and reports [`Appended::AlreadyRecorded`].
    ///
    /// # Errors
    /// If the backing store fails or times out
    #[tracing::instrument(level = "debug", skip_all, fields(queue_id = %status.queue_id, resolution = %status.resolution))]
    pub async fn record(&self, status: &DeliveryStatus) -> crate::Result<Appended> {
        let appended = self.bounded(self.backend.append(status)).await?;

        if appended == Appended::AlreadyRecorded {
            tracing::debug!(queue_id = %status.queue_id, "Status already recorded");
        }

        Ok(appended)
    }

    /// # Errors
    /// If the backing store fails or times out
    pub async fn get(&self, queue_id: &QueueId) -> crate::Result<Option<DeliveryStatus>> {
        self.bounded(self.backend.get(queue_id)).await
    }

    /// # Errors
    /// If the backing store fails or times out
    pub async fn contains(&self, queue_id: &QueueId) -> crate::Result<bool> {
        Ok(self.get(queue_id).await?.is_some())
    }

    /// Every recorded status, oldest resolution first
    ///
    /// # Errors
    /// If the backing store fails or times out
    pub async fn list(&self) -> crate::Result<Vec<DeliveryStatus>> {
        self.bounded(self.backend.list()).await
    }
}
