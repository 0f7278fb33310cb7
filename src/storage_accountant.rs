// storage_accountant.rs - quota inspection and reclaim.
//
// No platform storage API is available behind a port in this crate, so the
// estimate always takes the fixed-per-record fallback: ~1KB per expense,
// ~0.5MB per receipt.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::local_store::LocalStore;

const ESTIMATED_BYTES_PER_EXPENSE: u64 = 1024;
const ESTIMATED_BYTES_PER_RECEIPT: u64 = 512 * 1024;

/// Default `older_than` for [`StorageAccountant::cleanup_synced`].
pub const DEFAULT_CLEANUP_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageEstimate {
    pub expense_count: i64,
    pub receipt_count: i64,
    pub estimated_bytes: u64,
}

pub struct StorageAccountant {
    store: Arc<LocalStore>,
}

impl StorageAccountant {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Best-effort quota query. No platform storage API is wired in, so this
    /// always falls back to the fixed per-record estimate.
    pub async fn estimate(&self) -> Result<StorageEstimate> {
        let expense_count = self.store.expenses().count_all().await?;
        let receipt_count = self.store.receipts().count_all().await?;

        let estimated_bytes = expense_count as u64 * ESTIMATED_BYTES_PER_EXPENSE
            + receipt_count as u64 * ESTIMATED_BYTES_PER_RECEIPT;

        Ok(StorageEstimate { expense_count, receipt_count, estimated_bytes })
    }

    /// Removes `synced` records and `completed` queue items older than
    /// `older_than` (default 7 days).
    pub async fn cleanup_synced(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_default();

        let expenses = self.store.expenses().delete_synced_older_than(cutoff).await?;
        let receipts = self.store.receipts().delete_synced_older_than(cutoff).await?;
        let queue_items = self.store.sync_queue().delete_completed_older_than(cutoff).await?;

        let total = expenses + receipts + queue_items;
        tracing::info!(
            "storage cleanup removed {} expenses, {} receipts, {} queue items",
            expenses,
            receipts,
            queue_items
        );

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApprovalStatus, Expense, ExpenseCategory, SyncStatus};
    use uuid::Uuid;

    fn synced_expense(updated_at: chrono::DateTime<Utc>) -> Expense {
        Expense {
            local_id: Uuid::new_v4(),
            server_id: Some("srv-1".into()),
            amount_minor_units: 100,
            category: ExpenseCategory::Other,
            description: None,
            vendor_name: None,
            vendor_id: None,
            job_order_id: None,
            is_overhead: true,
            expense_date: updated_at,
            expense_time: None,
            gps: None,
            receipt_local_id: None,
            sync_status: SyncStatus::Synced,
            sync_error: None,
            sync_attempts: 0,
            approval_status: ApprovalStatus::Draft,
            created_at: updated_at,
            updated_at,
            last_attempt_at: None,
        }
    }

    #[tokio::test]
    async fn estimate_uses_fixed_per_record_sizes() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        store.expenses().add(&synced_expense(Utc::now())).await.unwrap();

        let accountant = StorageAccountant::new(store);
        let estimate = accountant.estimate().await.unwrap();
        assert_eq!(estimate.expense_count, 1);
        assert_eq!(estimate.receipt_count, 0);
        assert_eq!(estimate.estimated_bytes, ESTIMATED_BYTES_PER_EXPENSE);
    }

    #[tokio::test]
    async fn cleanup_synced_removes_only_old_synced_records() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let old = Utc::now() - chrono::Duration::days(10);
        let recent = Utc::now();
        store.expenses().add(&synced_expense(old)).await.unwrap();
        store.expenses().add(&synced_expense(recent)).await.unwrap();

        let accountant = StorageAccountant::new(store.clone());
        let removed = accountant.cleanup_synced(Duration::from_secs(7 * 24 * 60 * 60)).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.expenses().count_all().await.unwrap(), 1);
    }
}
