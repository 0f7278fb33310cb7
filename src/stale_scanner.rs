// stale_scanner.rs - stale-item detection: small, single-purpose async
// queries against the pool. Read-only: never modifies state.

use std::sync::Arc;

use chrono::Utc;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::local_store::LocalStore;

/// Stale counts by collection: `sync_status ∈ {pending, failed}` and
/// `now − created_at` past the configured threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleCounts {
    pub expenses: i64,
    pub receipts: i64,
    pub queue_items: i64,
}

pub struct StaleScanner {
    store: Arc<LocalStore>,
    config: EngineConfig,
}

impl StaleScanner {
    pub fn new(store: Arc<LocalStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub async fn scan(&self) -> Result<StaleCounts> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.stale_after).unwrap_or_default();

        Ok(StaleCounts {
            expenses: self.store.expenses().count_stale(cutoff).await?,
            receipts: self.store.receipts().count_stale(cutoff).await?,
            queue_items: self.store.sync_queue().stale(cutoff).await?.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExpenseCategory, SyncQueueItem, QueueItemStatus, QueueItemType};
    use uuid::Uuid;

    #[tokio::test]
    async fn scan_counts_nothing_when_everything_is_fresh() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let scanner = StaleScanner::new(store, EngineConfig::default());
        let counts = scanner.scan().await.unwrap();
        assert_eq!(counts, StaleCounts::default());
    }

    #[tokio::test]
    async fn scan_counts_old_pending_expenses_receipts_and_queue_items() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let old = Utc::now() - chrono::Duration::days(2);

        let mut config = EngineConfig::default();
        config.stale_after = std::time::Duration::from_secs(86_400);

        let expense = crate::types::Expense {
            local_id: Uuid::new_v4(),
            server_id: None,
            amount_minor_units: 500,
            category: ExpenseCategory::Other,
            description: None,
            vendor_name: None,
            vendor_id: None,
            job_order_id: None,
            is_overhead: true,
            expense_date: old,
            expense_time: None,
            gps: None,
            receipt_local_id: None,
            sync_status: crate::types::SyncStatus::Pending,
            sync_error: None,
            sync_attempts: 0,
            approval_status: crate::types::ApprovalStatus::Draft,
            created_at: old,
            updated_at: old,
            last_attempt_at: None,
        };
        store.expenses().add(&expense).await.unwrap();

        let queue_item = SyncQueueItem {
            id: Uuid::new_v4(),
            item_type: QueueItemType::Expense,
            target_local_id: expense.local_id,
            priority: 1,
            status: QueueItemStatus::Pending,
            retry_count: 0,
            created_at: old,
            last_attempt_at: None,
            last_error: None,
        };
        store.sync_queue().add(&queue_item).await.unwrap();

        let scanner = StaleScanner::new(store, config);
        let counts = scanner.scan().await.unwrap();
        assert_eq!(counts.expenses, 1);
        assert_eq!(counts.receipts, 0);
        assert_eq!(counts.queue_items, 1);
    }
}
