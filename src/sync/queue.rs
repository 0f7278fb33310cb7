// sync/queue.rs - SyncQueue: a thin projection over the `sync_queue`
// collection, adding priority-then-insertion ordering on top of the raw
// four-state status model.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::local_store::LocalStore;
use crate::types::{QueueItemStatus, QueueItemType, SyncQueueItem};

pub struct SyncQueue {
    store: Arc<LocalStore>,
}

impl SyncQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Insert a new item with `status = pending, retry_count = 0`.
    pub async fn enqueue(&self, item_type: QueueItemType, local_id: Uuid, priority: i32) -> Result<Uuid> {
        let item = SyncQueueItem {
            id: Uuid::new_v4(),
            item_type,
            target_local_id: local_id,
            priority,
            status: QueueItemStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
            last_error: None,
        };

        self.store.sync_queue().add(&item).await?;

        tracing::debug!(
            "enqueued {} sync item for {}",
            item_type.as_str(),
            local_id
        );

        Ok(item.id)
    }

    /// All `pending` items, priority descending, stable on insertion order.
    pub async fn pending_sorted_by_priority_desc(&self) -> Result<Vec<SyncQueueItem>> {
        self.store.sync_queue().pending_sorted_by_priority_desc().await
    }

    pub async fn pending_with_retries(&self) -> Result<Vec<SyncQueueItem>> {
        self.store.sync_queue().pending_with_retries().await
    }

    pub async fn get(&self, item_id: Uuid) -> Result<Option<SyncQueueItem>> {
        self.store.sync_queue().get(item_id).await
    }

    pub async fn mark_syncing(&self, item_id: Uuid) -> Result<()> {
        self.store.sync_queue().mark_status(item_id, QueueItemStatus::Syncing).await
    }

    pub async fn mark_completed(&self, item_id: Uuid) -> Result<()> {
        self.store.sync_queue().mark_status(item_id, QueueItemStatus::Completed).await
    }

    pub async fn mark_retry(&self, item_id: Uuid, retry_count: u32, error: &str) -> Result<()> {
        self.store
            .sync_queue()
            .mark_retry(item_id, retry_count, Utc::now(), error)
            .await
    }

    pub async fn mark_failed(&self, item_id: Uuid, retry_count: u32, error: &str) -> Result<()> {
        self.store
            .sync_queue()
            .mark_failed(item_id, retry_count, Utc::now(), error)
            .await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let store = self.store.sync_queue();
        Ok(QueueStats {
            pending: store.count_by_status(QueueItemStatus::Pending).await?,
            syncing: store.count_by_status(QueueItemStatus::Syncing).await?,
            completed: store.count_by_status(QueueItemStatus::Completed).await?,
            failed: store.count_by_status(QueueItemStatus::Failed).await?,
        })
    }

    pub async fn retry_all_failed(&self) -> Result<u64> {
        self.store.sync_queue().retry_all_failed(Utc::now()).await
    }

    pub async fn clear_failed(&self) -> Result<u64> {
        self.store.sync_queue().clear_failed().await
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub syncing: i64,
    pub completed: i64,
    pub failed: i64,
}
