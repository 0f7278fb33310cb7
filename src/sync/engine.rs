// sync/engine.rs - SyncEngine: the heart of the system.
//
// Drains the sync queue in priority order, dispatching each item to a typed
// sync function and marking the record/queue item completed or retried.
// Re-entrancy is guarded by an `AtomicBool`-backed Idle/Draining flag, and
// status updates fan out over a `tokio::sync::broadcast` channel so any
// number of subscribers can observe progress without polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backoff;
use crate::config::EngineConfig;
use crate::error::{Error, Result, SyncFailureKind};
use crate::local_store::LocalStore;
use crate::ports::{derived_path, AuthContext, BlobStore, Clock, Connectivity, ConnectivityCallback, RecordStore, SubscriptionId};
use crate::sync::queue::{QueueStats, SyncQueue};
use crate::sync::status::Status;
use crate::types::{Expense, QueueItemType, Receipt, SyncQueueItem};

struct EngineInner {
    store: Arc<LocalStore>,
    queue: SyncQueue,
    config: EngineConfig,
    auth: Arc<dyn AuthContext>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    record_store: Arc<dyn RecordStore>,
    blob_store: Arc<dyn BlobStore>,
    in_flight: AtomicBool,
    status_tx: StdMutex<Option<broadcast::Sender<Status>>>,
    sweep_handle: StdMutex<Option<JoinHandle<()>>>,
    conn_subscription: StdMutex<Option<SubscriptionId>>,
    shutting_down: AtomicBool,
}

/// Stateful but single-threaded from its own perspective; cloneable handle
/// over a shared inner, constructed with its collaborators injected rather
/// than reached for as globals.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

/// Releases the `in_flight` guard on drop, regardless of how `drain` exits.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

enum FailureAction {
    Continue,
    AbortPass,
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        config: EngineConfig,
        auth: Arc<dyn AuthContext>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        record_store: Arc<dyn RecordStore>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        let (status_tx, _rx) = broadcast::channel(64);
        let queue = SyncQueue::new(store.clone());

        let inner = Arc::new(EngineInner {
            store,
            queue,
            config,
            auth,
            connectivity,
            clock,
            record_store,
            blob_store,
            in_flight: AtomicBool::new(false),
            status_tx: StdMutex::new(Some(status_tx)),
            sweep_handle: StdMutex::new(None),
            conn_subscription: StdMutex::new(None),
            shutting_down: AtomicBool::new(false),
        });

        let sweep_inner = inner.clone();
        let handle = tokio::spawn(async move {
            Self::sweep_loop(sweep_inner).await;
        });
        *inner.sweep_handle.lock().unwrap() = Some(handle);

        // `new` is sync but `Connectivity::subscribe` is async, so the
        // registration itself runs in a spawned task.
        let subscribe_inner = inner.clone();
        tokio::spawn(async move {
            let online_inner = subscribe_inner.clone();
            let on_online: ConnectivityCallback = Arc::new(move || {
                Self::trigger_inner(&online_inner);
            });
            let on_offline: ConnectivityCallback = Arc::new(|| {});

            let id = subscribe_inner.connectivity.subscribe(on_online, on_offline).await;
            *subscribe_inner.conn_subscription.lock().unwrap() = Some(id);
        });

        Self { inner }
    }

    /// Request a drain pass. Non-blocking: the offline check and in-flight
    /// guard are both evaluated inside the spawned task, so `trigger()`
    /// itself never awaits.
    pub fn trigger(&self) {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::drain(&inner).await {
                tracing::error!("drain pass failed: {}", e);
            }
        });
    }

    /// Run the periodic-retry sweep once, on demand.
    pub async fn manual_retry(&self) -> Result<()> {
        Self::periodic_sweep(&self.inner).await
    }

    /// Subscribe to `Status` events. Dropping the receiver is equivalent to
    /// unsubscribing; the channel requires no explicit teardown.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Status>> {
        self.inner
            .status_tx
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or_else(|| Error::Sync("engine has been shut down".into()))
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.inner.queue.stats().await
    }

    pub async fn retry_all_failed(&self) -> Result<u64> {
        self.inner.queue.retry_all_failed().await
    }

    pub async fn clear_failed(&self) -> Result<u64> {
        self.inner.queue.clear_failed().await
    }

    /// Stop timers, clear listeners, unregister connectivity callbacks. Does
    /// not forcibly abort a running drain pass; it completes its current
    /// item and exits at the next loop boundary.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);

        if let Some(handle) = self.inner.sweep_handle.lock().unwrap().take() {
            handle.abort();
        }

        if let Some(id) = self.inner.conn_subscription.lock().unwrap().take() {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.connectivity.unsubscribe(id).await;
            });
        }

        // Dropping the sender closes every outstanding `Receiver`.
        *self.inner.status_tx.lock().unwrap() = None;
    }

    async fn sweep_loop(inner: Arc<EngineInner>) {
        loop {
            inner.clock.sleep(inner.config.retry_sweep_interval).await;

            if inner.shutting_down.load(Ordering::Acquire) {
                break;
            }

            if let Err(e) = Self::periodic_sweep(&inner).await {
                tracing::warn!("periodic retry sweep failed: {}", e);
            }
        }
    }

    /// Skipped entirely when offline or a pass is in flight.
    async fn periodic_sweep(inner: &Arc<EngineInner>) -> Result<()> {
        if !inner.connectivity.is_online().await {
            return Ok(());
        }
        if inner.in_flight.load(Ordering::Acquire) {
            return Ok(());
        }

        let candidates = inner.queue.pending_with_retries().await?;
        let now = inner.clock.now();

        let any_eligible = candidates.iter().any(|item| {
            let last_attempt = item.last_attempt_at.unwrap_or(now);
            backoff::eligible_at(last_attempt, item.retry_count, &inner.config) <= now
        });

        if any_eligible {
            Self::trigger_inner(inner);
        }

        Ok(())
    }

    fn trigger_inner(inner: &Arc<EngineInner>) {
        let inner = inner.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::drain(&inner).await {
                tracing::error!("drain pass failed: {}", e);
            }
        });
    }

    fn emit(inner: &EngineInner, status: Status) {
        if let Some(tx) = inner.status_tx.lock().unwrap().as_ref() {
            let _ = tx.send(status);
        }
    }

    /// The drain algorithm.
    async fn drain(inner: &Arc<EngineInner>) -> Result<()> {
        if !inner.connectivity.is_online().await {
            Self::emit(inner, Status::Idle);
            return Ok(());
        }

        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let _guard = InFlightGuard { flag: &inner.in_flight };

        Self::emit(inner, Status::Syncing { current: 0, total: 0 });

        let pending = inner.queue.pending_sorted_by_priority_desc().await?;
        let total = pending.len() as u32;

        for (idx, item) in pending.into_iter().enumerate() {
            let current_index = idx as u32 + 1;
            Self::emit(inner, Status::Syncing { current: current_index, total });

            // Another trigger may have raced and already claimed this item.
            let item = match inner.queue.get(item.id).await? {
                Some(item) if matches!(item.status, crate::types::QueueItemStatus::Pending) => item,
                _ => continue,
            };

            if !backoff::is_immediately_eligible(item.retry_count) {
                let now = inner.clock.now();
                let last_attempt = item.last_attempt_at.unwrap_or(now);
                let eligible = backoff::eligible_at(last_attempt, item.retry_count, &inner.config);
                if eligible > now {
                    if let Ok(wait) = (eligible - now).to_std() {
                        inner.clock.sleep(wait).await;
                    }
                }
            }

            inner.queue.mark_syncing(item.id).await?;
            Self::mark_record_syncing(inner, &item).await?;

            let dispatch = match item.item_type {
                QueueItemType::Receipt => Self::sync_receipt(inner, item.target_local_id).await,
                QueueItemType::Expense => Self::sync_expense(inner, item.target_local_id).await,
            };

            match dispatch {
                Ok(_server_id) => {
                    inner.queue.mark_completed(item.id).await?;
                }
                Err(e) => match Self::handle_item_failure(inner, &item, e).await? {
                    FailureAction::Continue => {}
                    FailureAction::AbortPass => break,
                },
            }
        }

        Self::emit(inner, Status::Idle);
        Ok(())
    }

    async fn handle_item_failure(
        inner: &Arc<EngineInner>,
        item: &SyncQueueItem,
        err: Error,
    ) -> Result<FailureAction> {
        let kind = err.classify();
        let message = err.to_string();

        let action = match kind {
            SyncFailureKind::Unauthenticated => {
                // Abort the pass; leave the record/queue item unchanged so
                // the next online trigger retries it without penalty.
                inner.queue.mark_retry(item.id, item.retry_count, &message).await.ok();
                FailureAction::AbortPass
            }
            SyncFailureKind::NotFound | SyncFailureKind::StorageQuotaExceeded => {
                inner.queue.mark_failed(item.id, item.retry_count, &message).await?;
                Self::mark_record_failed(inner, item, &message).await?;
                FailureAction::Continue
            }
            SyncFailureKind::Network
            | SyncFailureKind::RemoteReject
            | SyncFailureKind::ReceiptNotSynced
            | SyncFailureKind::Other => {
                let new_retry = item.retry_count + 1;
                if new_retry >= inner.config.max_retries {
                    inner.queue.mark_failed(item.id, new_retry, &message).await?;
                    Self::mark_record_failed(inner, item, &message).await?;
                } else {
                    inner.queue.mark_retry(item.id, new_retry, &message).await?;
                    Self::mark_record_retry(inner, item, &message, new_retry).await?;
                }
                FailureAction::Continue
            }
        };

        Self::emit(inner, Status::Error { kind, message });
        Ok(action)
    }

    async fn mark_record_syncing(inner: &Arc<EngineInner>, item: &SyncQueueItem) -> Result<()> {
        match item.item_type {
            QueueItemType::Expense => {
                inner.store.expenses().mark_syncing(item.target_local_id, inner.clock.now()).await
            }
            QueueItemType::Receipt => inner.store.receipts().mark_syncing(item.target_local_id).await,
        }
    }

    async fn mark_record_retry(
        inner: &Arc<EngineInner>,
        item: &SyncQueueItem,
        message: &str,
        attempts: u32,
    ) -> Result<()> {
        let now = inner.clock.now();
        match item.item_type {
            QueueItemType::Expense => {
                inner.store.expenses().mark_retry(item.target_local_id, message, attempts, now).await
            }
            QueueItemType::Receipt => {
                inner.store.receipts().mark_retry(item.target_local_id, message, attempts, now).await
            }
        }
    }

    async fn mark_record_failed(inner: &Arc<EngineInner>, item: &SyncQueueItem, message: &str) -> Result<()> {
        let now = inner.clock.now();
        match item.item_type {
            QueueItemType::Expense => {
                inner
                    .store
                    .expenses()
                    .mark_failed(item.target_local_id, message, item.retry_count, now)
                    .await
            }
            QueueItemType::Receipt => {
                inner.store.receipts().mark_failed(item.target_local_id, message, item.retry_count).await
            }
        }
    }

    async fn sync_receipt(inner: &Arc<EngineInner>, local_id: Uuid) -> Result<String> {
        let receipt: Receipt = inner
            .store
            .receipts()
            .get(local_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("receipt {local_id}")))?;

        let user_id = inner.auth.current_user_id().await.ok_or(Error::Unauthenticated)?;

        let key = derived_path(user_id, &receipt.original_filename);
        let storage_path = inner.blob_store.put(&key, receipt.image_bytes.clone()).await?;

        let payload = receipt_insert_payload(&receipt, user_id, &storage_path);

        match inner.record_store.insert("receipts", payload).await {
            Ok(server_id) => {
                inner.store.receipts().mark_synced(local_id, &server_id).await?;
                Ok(server_id)
            }
            Err(e) => {
                // Best-effort rollback; failure here is logged, not surfaced.
                if let Err(remove_err) = inner.blob_store.remove(&storage_path).await {
                    tracing::warn!(
                        "best-effort blob rollback failed for {}: {}",
                        storage_path,
                        remove_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn sync_expense(inner: &Arc<EngineInner>, local_id: Uuid) -> Result<String> {
        let expense: Expense = inner
            .store
            .expenses()
            .get(local_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("expense {local_id}")))?;

        let user_id = inner.auth.current_user_id().await.ok_or(Error::Unauthenticated)?;

        let receipt_server_id = match expense.receipt_local_id {
            Some(receipt_local_id) => {
                let receipt = inner
                    .store
                    .receipts()
                    .get(receipt_local_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("receipt {receipt_local_id}")))?;

                match receipt.server_id {
                    Some(server_id) => Some(server_id),
                    None => return Err(Error::ReceiptNotSynced(receipt_local_id.to_string())),
                }
            }
            None => None,
        };

        let payload = expense_insert_payload(&expense, user_id, receipt_server_id);
        let server_id = inner.record_store.insert("expenses", payload).await?;
        inner.store.expenses().mark_synced(local_id, &server_id, inner.clock.now()).await?;

        Ok(server_id)
    }
}

/// Wire shape for the receipts table insert.
fn receipt_insert_payload(receipt: &Receipt, user_id: Uuid, storage_path: &str) -> serde_json::Value {
    let ocr = receipt.ocr.as_ref();

    json!({
        "user_id": user_id,
        "storage_path": storage_path,
        "original_filename": receipt.original_filename,
        "file_size": receipt.file_size,
        "mime_type": receipt.mime_type,
        "image_width": receipt.image_width,
        "image_height": receipt.image_height,
        "ocr_raw_text": ocr.map(|o| o.raw_text.clone()),
        "ocr_confidence": ocr.map(|o| o.confidence),
        "extracted_amount": ocr.and_then(|o| o.extracted_amount_minor_units),
        "extracted_vendor_name": ocr.and_then(|o| o.extracted_vendor_name.clone()),
        "extracted_date": ocr.and_then(|o| o.extracted_date).map(|d| d.to_rfc3339()),
        "local_id": receipt.local_id,
        "sync_status": "synced",
    })
}

/// Wire shape for the expenses table insert.
fn expense_insert_payload(expense: &Expense, user_id: Uuid, receipt_id: Option<String>) -> serde_json::Value {
    json!({
        "user_id": user_id,
        "amount": expense.amount_minor_units,
        "category": expense.category.as_str(),
        "description": expense.description,
        "vendor_name": expense.vendor_name,
        "vendor_id": expense.vendor_id,
        "job_order_id": expense.job_order_id,
        "is_overhead": expense.is_overhead,
        "expense_date": expense.expense_date.to_rfc3339(),
        "expense_time": expense.expense_time.map(|t| t.to_rfc3339()),
        "gps_latitude": expense.gps.map(|g| g.latitude),
        "gps_longitude": expense.gps.map(|g| g.longitude),
        "gps_accuracy": expense.gps.map(|g| g.accuracy_meters),
        "receipt_id": receipt_id,
        "local_id": expense.local_id,
        "sync_status": "synced",
        "approval_status": "draft",
    })
}
