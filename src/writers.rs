// writers.rs - ports exposed to the host for write-side intents: a thin
// struct that composes LocalStore + SyncQueue + SyncEngine and exposes the
// handful of operations a caller actually needs, rather than handing out the
// stores directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::local_store::LocalStore;
use crate::sync::{SyncEngine, SyncQueue};
use crate::types::{ApprovalStatus, Expense, ExpenseCategory, GpsFix, OcrArtifact, QueueItemType, Receipt, SyncStatus};

/// Input to `save_expense_locally`; mirrors the expense form fields a host
/// UI would have already validated. Form validation itself is the host's
/// responsibility, not this crate's.
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub amount_minor_units: i64,
    pub category: ExpenseCategory,
    pub description: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_id: Option<String>,
    pub job_order_id: Option<String>,
    pub is_overhead: bool,
    pub expense_date: DateTime<Utc>,
    pub expense_time: Option<DateTime<Utc>>,
    pub gps: Option<GpsFix>,
    pub receipt_local_id: Option<Uuid>,
}

/// Input to `save_receipt_locally`.
#[derive(Debug, Clone)]
pub struct NewReceipt {
    pub image_bytes: Vec<u8>,
    pub original_filename: String,
    pub mime_type: String,
    pub image_width: i32,
    pub image_height: i32,
    pub ocr: Option<OcrArtifact>,
}

#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub sync_status: Option<Vec<SyncStatus>>,
    pub job_order_id: Option<String>,
    pub limit: Option<i64>,
}

pub struct Writers {
    store: Arc<LocalStore>,
    queue: SyncQueue,
    engine: SyncEngine,
    config: EngineConfig,
}

impl Writers {
    pub fn new(store: Arc<LocalStore>, engine: SyncEngine, config: EngineConfig) -> Self {
        let queue = SyncQueue::new(store.clone());
        Self { store, queue, engine, config }
    }

    /// Inserts an Expense, enqueues priority `expense_priority`, and
    /// triggers the engine (a no-op if offline).
    pub async fn save_expense_locally(&self, input: NewExpense) -> Result<Expense> {
        let now = Utc::now();
        let expense = Expense {
            local_id: Uuid::new_v4(),
            server_id: None,
            amount_minor_units: input.amount_minor_units,
            category: input.category,
            description: input.description,
            vendor_name: input.vendor_name,
            vendor_id: input.vendor_id,
            job_order_id: input.job_order_id,
            is_overhead: input.is_overhead,
            expense_date: input.expense_date,
            expense_time: input.expense_time,
            gps: input.gps,
            receipt_local_id: input.receipt_local_id,
            sync_status: SyncStatus::Pending,
            sync_error: None,
            sync_attempts: 0,
            approval_status: ApprovalStatus::Draft,
            created_at: now,
            updated_at: now,
            last_attempt_at: None,
        };

        self.store.expenses().add(&expense).await?;
        self.queue
            .enqueue(QueueItemType::Expense, expense.local_id, self.config.expense_priority)
            .await?;
        self.engine.trigger();

        tracing::debug!("saved expense {} locally", expense.local_id);
        Ok(expense)
    }

    /// Inserts a Receipt, enqueues priority `receipt_priority`, and triggers
    /// the engine. Image compression is the caller's responsibility.
    pub async fn save_receipt_locally(&self, input: NewReceipt) -> Result<Receipt> {
        let now = Utc::now();
        let receipt = Receipt {
            local_id: Uuid::new_v4(),
            server_id: None,
            file_size: input.image_bytes.len() as i64,
            image_bytes: input.image_bytes,
            original_filename: input.original_filename,
            mime_type: input.mime_type,
            image_width: input.image_width,
            image_height: input.image_height,
            ocr: input.ocr,
            sync_status: SyncStatus::Pending,
            sync_error: None,
            sync_attempts: 0,
            created_at: now,
        };

        self.store.receipts().add(&receipt).await?;
        self.queue
            .enqueue(QueueItemType::Receipt, receipt.local_id, self.config.receipt_priority)
            .await?;
        self.engine.trigger();

        tracing::debug!("saved receipt {} locally", receipt.local_id);
        Ok(receipt)
    }

    pub async fn get_local_expenses(&self, filter: ExpenseFilter) -> Result<Vec<Expense>> {
        let mut expenses = if let Some(job_order_id) = &filter.job_order_id {
            self.store.expenses().by_job_order(job_order_id).await?
        } else if let Some(statuses) = &filter.sync_status {
            self.store.expenses().by_status(statuses).await?
        } else {
            self.store.expenses().all(filter.limit).await?
        };

        if filter.job_order_id.is_some() {
            if let Some(statuses) = &filter.sync_status {
                expenses.retain(|e| statuses.contains(&e.sync_status));
            }
            if let Some(limit) = filter.limit {
                expenses.truncate(limit as usize);
            }
        }

        Ok(expenses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{AuthContext, BlobStore, Clock, Connectivity, RecordStore, RemoteRow};
    use crate::types::SyncStatus;

    struct OfflineConnectivity;

    #[async_trait::async_trait]
    impl Connectivity for OfflineConnectivity {
        async fn is_online(&self) -> bool {
            false
        }
        async fn subscribe(
            &self,
            _on_online: crate::ports::ConnectivityCallback,
            _on_offline: crate::ports::ConnectivityCallback,
        ) -> crate::ports::SubscriptionId {
            0
        }
        async fn unsubscribe(&self, _id: crate::ports::SubscriptionId) {}
    }

    struct NoopAuth;

    #[async_trait::async_trait]
    impl AuthContext for NoopAuth {
        async fn current_user_id(&self) -> Option<Uuid> {
            None
        }
    }

    struct SystemClock;

    #[async_trait::async_trait]
    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
        async fn sleep(&self, duration: std::time::Duration) {
            tokio::time::sleep(duration).await;
        }
    }

    struct UnusedRecordStore;

    #[async_trait::async_trait]
    impl RecordStore for UnusedRecordStore {
        async fn insert(&self, _table: &str, _row: serde_json::Value) -> Result<String> {
            unreachable!("writers never call RecordStore directly")
        }
        async fn select(&self, _table: &str, _filter: serde_json::Value) -> Result<Vec<RemoteRow>> {
            unreachable!("writers never call RecordStore directly")
        }
    }

    struct UnusedBlobStore;

    #[async_trait::async_trait]
    impl BlobStore for UnusedBlobStore {
        async fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<String> {
            unreachable!("writers never call BlobStore directly")
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            unreachable!("writers never call BlobStore directly")
        }
    }

    /// `trigger()` only spawns work; keeping connectivity offline means the
    /// spawned drain pass is a guaranteed no-op against these unreachable!() fakes.
    async fn build_writers(store: Arc<LocalStore>, config: EngineConfig) -> Writers {
        let engine = SyncEngine::new(
            store.clone(),
            config,
            Arc::new(NoopAuth),
            Arc::new(OfflineConnectivity),
            Arc::new(SystemClock),
            Arc::new(UnusedRecordStore),
            Arc::new(UnusedBlobStore),
        );
        Writers::new(store, engine, config)
    }

    fn new_expense_input() -> NewExpense {
        NewExpense {
            amount_minor_units: 2500,
            category: ExpenseCategory::Fuel,
            description: None,
            vendor_name: Some("Shell".into()),
            vendor_id: None,
            job_order_id: None,
            is_overhead: true,
            expense_date: Utc::now(),
            expense_time: None,
            gps: None,
            receipt_local_id: None,
        }
    }

    #[tokio::test]
    async fn save_expense_locally_persists_pending_and_enqueues() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let writers = build_writers(store.clone(), EngineConfig::default()).await;

        let expense = writers.save_expense_locally(new_expense_input()).await.unwrap();
        assert_eq!(expense.sync_status, SyncStatus::Pending);

        let queue = store.sync_queue().pending_sorted_by_priority_desc().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].target_local_id, expense.local_id);
    }

    #[tokio::test]
    async fn save_receipt_locally_persists_pending_and_enqueues() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let writers = build_writers(store.clone(), EngineConfig::default()).await;

        let receipt = writers
            .save_receipt_locally(NewReceipt {
                image_bytes: vec![1, 2, 3, 4],
                original_filename: "r.jpg".into(),
                mime_type: "image/jpeg".into(),
                image_width: 10,
                image_height: 10,
                ocr: None,
            })
            .await
            .unwrap();

        assert_eq!(receipt.file_size, 4);
        let queue = store.sync_queue().pending_sorted_by_priority_desc().await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn get_local_expenses_filters_by_job_order_and_status() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let writers = build_writers(store.clone(), EngineConfig::default()).await;

        let mut with_job = new_expense_input();
        with_job.job_order_id = Some("JO-1".into());
        with_job.is_overhead = false;
        writers.save_expense_locally(with_job).await.unwrap();
        writers.save_expense_locally(new_expense_input()).await.unwrap();

        let filtered = writers
            .get_local_expenses(ExpenseFilter { job_order_id: Some("JO-1".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let all = writers.get_local_expenses(ExpenseFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
