// types.rs - domain model shared by the local store, sync engine, and read merger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of expense categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Fuel,
    Lodging,
    Meals,
    Tolls,
    Parking,
    Supplies,
    Equipment,
    Other,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseCategory::Fuel => "fuel",
            ExpenseCategory::Lodging => "lodging",
            ExpenseCategory::Meals => "meals",
            ExpenseCategory::Tolls => "tolls",
            ExpenseCategory::Parking => "parking",
            ExpenseCategory::Supplies => "supplies",
            ExpenseCategory::Equipment => "equipment",
            ExpenseCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "fuel" => ExpenseCategory::Fuel,
            "lodging" => ExpenseCategory::Lodging,
            "meals" => ExpenseCategory::Meals,
            "tolls" => ExpenseCategory::Tolls,
            "parking" => ExpenseCategory::Parking,
            "supplies" => ExpenseCategory::Supplies,
            "equipment" => ExpenseCategory::Equipment,
            "other" => ExpenseCategory::Other,
            _ => return None,
        })
    }
}

/// Per-record sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => SyncStatus::Pending,
            "syncing" => SyncStatus::Syncing,
            "synced" => SyncStatus::Synced,
            "failed" => SyncStatus::Failed,
            _ => return None,
        })
    }
}

/// Per-queue-item lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Syncing => "syncing",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => QueueItemStatus::Pending,
            "syncing" => QueueItemStatus::Syncing,
            "completed" => QueueItemStatus::Completed,
            "failed" => QueueItemStatus::Failed,
            _ => return None,
        })
    }
}

/// Target record kind of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemType {
    Expense,
    Receipt,
}

impl QueueItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemType::Expense => "expense",
            QueueItemType::Receipt => "receipt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "expense" => QueueItemType::Expense,
            "receipt" => QueueItemType::Receipt,
            _ => return None,
        })
    }
}

/// Approval status is stored and returned verbatim; the engine never branches
/// on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "draft",
            ApprovalStatus::Submitted => "submitted",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => ApprovalStatus::Draft,
            "submitted" => ApprovalStatus::Submitted,
            "approved" => ApprovalStatus::Approved,
            "rejected" => ApprovalStatus::Rejected,
            _ => return None,
        })
    }
}

/// A GPS fix captured at expense time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
}

/// Expense entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub local_id: Uuid,
    pub server_id: Option<String>,
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
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub sync_attempts: u32,
    pub approval_status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl Expense {
    /// Invariant 6: exactly one of `job_order_id` / `is_overhead` holds.
    pub fn has_valid_job_binding(&self) -> bool {
        self.job_order_id.is_some() != self.is_overhead
    }
}

/// Per-field OCR extraction with confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrArtifact {
    pub raw_text: String,
    pub confidence: f64,
    pub extracted_amount_minor_units: Option<i64>,
    pub extracted_amount_confidence: Option<f64>,
    pub extracted_vendor_name: Option<String>,
    pub extracted_vendor_confidence: Option<f64>,
    pub extracted_date: Option<DateTime<Utc>>,
    pub extracted_date_confidence: Option<f64>,
}

/// Receipt entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub local_id: Uuid,
    pub server_id: Option<String>,
    pub image_bytes: Vec<u8>,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub image_width: i32,
    pub image_height: i32,
    pub ocr: Option<OcrArtifact>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub sync_attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// Behavior shared by the two syncable content types so the engine's
/// bookkeeping (mark-synced / mark-failed) isn't duplicated per type. Write
/// dispatch itself stays concrete per entity.
pub trait Syncable {
    fn local_id(&self) -> Uuid;
    fn server_id(&self) -> Option<&str>;
    fn sync_status(&self) -> SyncStatus;
}

impl Syncable for Expense {
    fn local_id(&self) -> Uuid {
        self.local_id
    }
    fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }
    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }
}

impl Syncable for Receipt {
    fn local_id(&self) -> Uuid {
        self.local_id
    }
    fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }
    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }
}

/// Sync queue work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: Uuid,
    pub item_type: QueueItemType,
    pub target_local_id: Uuid,
    pub priority: i32,
    pub status: QueueItemStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Cached reference data for job orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedJobOrder {
    pub job_number: String,
    pub customer_name: String,
    pub origin: String,
    pub destination: String,
    pub coordinates: Option<(f64, f64)>,
    pub cached_at: DateTime<Utc>,
}
