// local_store/sync_queue.rs - raw access to the `sync_queue` collection.
//
// `sync::queue::SyncQueue` is the thin, public projection built on top of
// this module, which owns the indexed storage underneath it.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{QueueItemStatus, QueueItemType, SyncQueueItem};

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: String,
    item_type: String,
    target_local_id: String,
    priority: i32,
    status: String,
    retry_count: i64,
    created_at: String,
    last_attempt_at: Option<String>,
    last_error: Option<String>,
}

impl TryFrom<QueueRow> for SyncQueueItem {
    type Error = Error;

    fn try_from(row: QueueRow) -> Result<Self> {
        Ok(SyncQueueItem {
            id: Uuid::parse_str(&row.id).map_err(|e| Error::Serialization(e.to_string()))?,
            item_type: QueueItemType::parse(&row.item_type)
                .ok_or_else(|| Error::Serialization(format!("unknown item_type: {}", row.item_type)))?,
            target_local_id: Uuid::parse_str(&row.target_local_id)
                .map_err(|e| Error::Serialization(e.to_string()))?,
            priority: row.priority,
            status: QueueItemStatus::parse(&row.status)
                .ok_or_else(|| Error::Serialization(format!("unknown status: {}", row.status)))?,
            retry_count: row.retry_count as u32,
            created_at: parse_dt(&row.created_at)?,
            last_attempt_at: row.last_attempt_at.as_deref().map(parse_dt).transpose()?,
            last_error: row.last_error,
        })
    }
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

pub struct SyncQueueStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SyncQueueStore<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new queue item. Fails with `DuplicateKey` if `id` is reused,
    /// or if another non-terminal item already targets the same
    /// `(item_type, target_local_id)` — enforced by a partial unique index.
    pub async fn add(&self, item: &SyncQueueItem) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_queue (id, item_type, target_local_id, priority, status, retry_count, created_at, last_attempt_at, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.item_type.as_str())
        .bind(item.target_local_id.to_string())
        .bind(item.priority)
        .bind(item.status.as_str())
        .bind(item.retry_count as i64)
        .bind(item.created_at.to_rfc3339())
        .bind(item.last_attempt_at.map(|t| t.to_rfc3339()))
        .bind(&item.last_error)
        .execute(self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => Err(
                Error::DuplicateKey(format!("{} {}", item.item_type.as_str(), item.target_local_id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<SyncQueueItem>> {
        let row: Option<QueueRow> = sqlx::query_as("SELECT * FROM sync_queue WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool)
            .await?;

        row.map(SyncQueueItem::try_from).transpose()
    }

    /// All `pending` items, priority descending, stable on insertion order
    /// (SQLite's implicit `rowid` is monotonically increasing) within a
    /// priority class.
    pub async fn pending_sorted_by_priority_desc(&self) -> Result<Vec<SyncQueueItem>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT * FROM sync_queue WHERE status = 'pending' ORDER BY priority DESC, rowid ASC",
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(SyncQueueItem::try_from).collect()
    }

    /// Pending items with at least one prior attempt, for the periodic sweep.
    pub async fn pending_with_retries(&self) -> Result<Vec<SyncQueueItem>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT * FROM sync_queue WHERE status = 'pending' AND retry_count >= 1",
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(SyncQueueItem::try_from).collect()
    }

    pub async fn mark_status(&self, id: Uuid, status: QueueItemStatus) -> Result<()> {
        let result = sqlx::query("UPDATE sync_queue SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn mark_retry(
        &self,
        id: Uuid,
        retry_count: u32,
        last_attempt: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'pending', retry_count = ?, last_attempt_at = ?, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(retry_count as i64)
        .bind(last_attempt.to_rfc3339())
        .bind(error)
        .bind(id.to_string())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        id: Uuid,
        retry_count: u32,
        last_attempt: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'failed', retry_count = ?, last_attempt_at = ?, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(retry_count as i64)
        .bind(last_attempt.to_rfc3339())
        .bind(error)
        .bind(id.to_string())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn count_by_status(&self, status: QueueItemStatus) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_queue WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    pub async fn retry_all_failed(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'pending', retry_count = 0, last_error = NULL, last_attempt_at = ? WHERE status = 'failed'",
        )
        .bind(now.to_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_failed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE status = 'failed'")
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_completed_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sync_queue WHERE status = 'completed' AND COALESCE(last_attempt_at, created_at) < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// `pending`/`failed` items created before `cutoff`.
    pub async fn stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<SyncQueueItem>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT * FROM sync_queue WHERE status IN ('pending', 'failed') AND created_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(SyncQueueItem::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::LocalStore;

    fn item(item_type: QueueItemType, priority: i32) -> SyncQueueItem {
        SyncQueueItem {
            id: Uuid::new_v4(),
            item_type,
            target_local_id: Uuid::new_v4(),
            priority,
            status: QueueItemStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn duplicate_non_terminal_item_for_same_target_is_rejected() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let target = Uuid::new_v4();
        let mut first = item(QueueItemType::Expense, 1);
        first.target_local_id = target;
        let mut second = item(QueueItemType::Expense, 1);
        second.target_local_id = target;

        store.sync_queue().add(&first).await.unwrap();
        assert!(matches!(store.sync_queue().add(&second).await, Err(Error::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn terminal_item_does_not_block_a_new_one_for_the_same_target() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let target = Uuid::new_v4();
        let mut first = item(QueueItemType::Expense, 1);
        first.target_local_id = target;
        store.sync_queue().add(&first).await.unwrap();
        store.sync_queue().mark_status(first.id, QueueItemStatus::Completed).await.unwrap();

        let mut second = item(QueueItemType::Expense, 1);
        second.target_local_id = target;
        store.sync_queue().add(&second).await.unwrap();
    }

    #[tokio::test]
    async fn pending_sorted_by_priority_desc_then_insertion_order() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let low = item(QueueItemType::Expense, 1);
        let high_first = item(QueueItemType::Receipt, 2);
        let high_second = item(QueueItemType::Receipt, 2);

        store.sync_queue().add(&low).await.unwrap();
        store.sync_queue().add(&high_first).await.unwrap();
        store.sync_queue().add(&high_second).await.unwrap();

        let ordered = store.sync_queue().pending_sorted_by_priority_desc().await.unwrap();
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered[0].id, high_first.id);
        assert_eq!(ordered[1].id, high_second.id);
        assert_eq!(ordered[2].id, low.id);
    }

    #[tokio::test]
    async fn mark_retry_reverts_to_pending_with_bookkeeping() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let queued = item(QueueItemType::Expense, 1);
        store.sync_queue().add(&queued).await.unwrap();
        store.sync_queue().mark_status(queued.id, QueueItemStatus::Syncing).await.unwrap();

        store.sync_queue().mark_retry(queued.id, 1, Utc::now(), "network blip").await.unwrap();

        let fetched = store.sync_queue().get(queued.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, QueueItemStatus::Pending);
        assert_eq!(fetched.retry_count, 1);
        assert_eq!(fetched.last_error.as_deref(), Some("network blip"));
    }

    #[tokio::test]
    async fn retry_all_failed_resets_retry_count_and_clear_failed_removes_them() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let queued = item(QueueItemType::Expense, 1);
        store.sync_queue().add(&queued).await.unwrap();
        store.sync_queue().mark_failed(queued.id, 5, Utc::now(), "gave up").await.unwrap();

        let reset = store.sync_queue().retry_all_failed(Utc::now()).await.unwrap();
        assert_eq!(reset, 1);
        let fetched = store.sync_queue().get(queued.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, QueueItemStatus::Pending);
        assert_eq!(fetched.retry_count, 0);

        store.sync_queue().mark_failed(queued.id, 5, Utc::now(), "gave up again").await.unwrap();
        let cleared = store.sync_queue().clear_failed().await.unwrap();
        assert_eq!(cleared, 1);
        assert!(store.sync_queue().get(queued.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_status_on_missing_item_is_not_found() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let err = store.sync_queue().mark_status(Uuid::new_v4(), QueueItemStatus::Completed).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
