// local_store/expenses.rs - typed access to the `expenses` collection.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{ApprovalStatus, Expense, ExpenseCategory, GpsFix, SyncStatus};

#[derive(sqlx::FromRow)]
struct ExpenseRow {
    local_id: String,
    server_id: Option<String>,
    amount_minor_units: i64,
    category: String,
    description: Option<String>,
    vendor_name: Option<String>,
    vendor_id: Option<String>,
    job_order_id: Option<String>,
    is_overhead: bool,
    expense_date: String,
    expense_time: Option<String>,
    gps_latitude: Option<f64>,
    gps_longitude: Option<f64>,
    gps_accuracy: Option<f64>,
    receipt_local_id: Option<String>,
    sync_status: String,
    sync_error: Option<String>,
    sync_attempts: i64,
    approval_status: String,
    created_at: String,
    updated_at: String,
    last_attempt_at: Option<String>,
}

impl TryFrom<ExpenseRow> for Expense {
    type Error = Error;

    fn try_from(row: ExpenseRow) -> Result<Self> {
        Ok(Expense {
            local_id: Uuid::parse_str(&row.local_id)
                .map_err(|e| Error::Serialization(e.to_string()))?,
            server_id: row.server_id,
            amount_minor_units: row.amount_minor_units,
            category: ExpenseCategory::parse(&row.category)
                .ok_or_else(|| Error::Serialization(format!("unknown category: {}", row.category)))?,
            description: row.description,
            vendor_name: row.vendor_name,
            vendor_id: row.vendor_id,
            job_order_id: row.job_order_id,
            is_overhead: row.is_overhead,
            expense_date: parse_dt(&row.expense_date)?,
            expense_time: row.expense_time.map(|s| parse_dt(&s)).transpose()?,
            gps: match (row.gps_latitude, row.gps_longitude, row.gps_accuracy) {
                (Some(latitude), Some(longitude), Some(accuracy_meters)) => Some(GpsFix {
                    latitude,
                    longitude,
                    accuracy_meters,
                }),
                _ => None,
            },
            receipt_local_id: row
                .receipt_local_id
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .map_err(|e| Error::Serialization(e.to_string()))?,
            sync_status: SyncStatus::parse(&row.sync_status)
                .ok_or_else(|| Error::Serialization(format!("unknown sync_status: {}", row.sync_status)))?,
            sync_error: row.sync_error,
            sync_attempts: row.sync_attempts as u32,
            approval_status: ApprovalStatus::parse(&row.approval_status).ok_or_else(|| {
                Error::Serialization(format!("unknown approval_status: {}", row.approval_status))
            })?,
            created_at: parse_dt(&row.created_at)?,
            updated_at: parse_dt(&row.updated_at)?,
            last_attempt_at: row.last_attempt_at.map(|s| parse_dt(&s)).transpose()?,
        })
    }
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Typed access to the `expenses` collection.
pub struct ExpenseStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ExpenseStore<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, expense: &Expense) -> Result<()> {
        if !expense.has_valid_job_binding() {
            return Err(Error::Validation(
                "exactly one of job_order_id / is_overhead must hold".into(),
            ));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO expenses (
                local_id, server_id, amount_minor_units, category, description, vendor_name, vendor_id,
                job_order_id, is_overhead, expense_date, expense_time, gps_latitude,
                gps_longitude, gps_accuracy, receipt_local_id, sync_status, sync_error,
                sync_attempts, approval_status, created_at, updated_at, last_attempt_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(expense.local_id.to_string())
        .bind(&expense.server_id)
        .bind(expense.amount_minor_units)
        .bind(expense.category.as_str())
        .bind(&expense.description)
        .bind(&expense.vendor_name)
        .bind(&expense.vendor_id)
        .bind(&expense.job_order_id)
        .bind(expense.is_overhead)
        .bind(expense.expense_date.to_rfc3339())
        .bind(expense.expense_time.map(|t| t.to_rfc3339()))
        .bind(expense.gps.map(|g| g.latitude))
        .bind(expense.gps.map(|g| g.longitude))
        .bind(expense.gps.map(|g| g.accuracy_meters))
        .bind(expense.receipt_local_id.map(|id| id.to_string()))
        .bind(expense.sync_status.as_str())
        .bind(&expense.sync_error)
        .bind(expense.sync_attempts as i64)
        .bind(expense.approval_status.as_str())
        .bind(expense.created_at.to_rfc3339())
        .bind(expense.updated_at.to_rfc3339())
        .bind(expense.last_attempt_at.map(|t| t.to_rfc3339()))
        .execute(self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => Err(
                Error::DuplicateKey(expense.local_id.to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, local_id: Uuid) -> Result<Option<Expense>> {
        let row: Option<ExpenseRow> = sqlx::query_as("SELECT * FROM expenses WHERE local_id = ?")
            .bind(local_id.to_string())
            .fetch_optional(self.pool)
            .await?;

        row.map(Expense::try_from).transpose()
    }

    pub async fn by_status(&self, statuses: &[SyncStatus]) -> Result<Vec<Expense>> {
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!("SELECT * FROM expenses WHERE sync_status IN ({placeholders}) ORDER BY created_at DESC");

        let mut query = sqlx::query_as(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows: Vec<ExpenseRow> = query.fetch_all(self.pool).await?;
        rows.into_iter().map(Expense::try_from).collect()
    }

    pub async fn all(&self, limit: Option<i64>) -> Result<Vec<Expense>> {
        let rows: Vec<ExpenseRow> = match limit {
            Some(limit) => {
                sqlx::query_as("SELECT * FROM expenses ORDER BY expense_date DESC, created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM expenses ORDER BY expense_date DESC, created_at DESC")
                    .fetch_all(self.pool)
                    .await?
            }
        };

        rows.into_iter().map(Expense::try_from).collect()
    }

    pub async fn by_job_order(&self, job_order_id: &str) -> Result<Vec<Expense>> {
        let rows: Vec<ExpenseRow> = sqlx::query_as(
            "SELECT * FROM expenses WHERE job_order_id = ? ORDER BY expense_date DESC",
        )
        .bind(job_order_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Expense::try_from).collect()
    }

    pub async fn count_by_status(&self, status: SyncStatus) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM expenses WHERE sync_status = ?")
            .bind(status.as_str())
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }

    pub async fn count_all(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM expenses").fetch_one(self.pool).await?;
        Ok(count)
    }

    /// Apply a successful sync.
    pub async fn mark_synced(&self, local_id: Uuid, server_id: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE expenses
            SET server_id = ?, sync_status = 'synced', sync_error = NULL, updated_at = ?
            WHERE local_id = ?
            "#,
        )
        .bind(server_id)
        .bind(now.to_rfc3339())
        .bind(local_id.to_string())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(local_id.to_string()));
        }
        Ok(())
    }

    /// Apply a transient failure with retries left.
    pub async fn mark_retry(
        &self,
        local_id: Uuid,
        error: &str,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE expenses
            SET sync_status = 'pending', sync_error = ?, sync_attempts = ?,
                last_attempt_at = ?, updated_at = ?
            WHERE local_id = ?
            "#,
        )
        .bind(error)
        .bind(attempts as i64)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(local_id.to_string())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(local_id.to_string()));
        }
        Ok(())
    }

    /// Apply a terminal failure.
    pub async fn mark_failed(
        &self,
        local_id: Uuid,
        error: &str,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE expenses
            SET sync_status = 'failed', sync_error = ?, sync_attempts = ?,
                last_attempt_at = ?, updated_at = ?
            WHERE local_id = ?
            "#,
        )
        .bind(error)
        .bind(attempts as i64)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(local_id.to_string())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(local_id.to_string()));
        }
        Ok(())
    }

    pub async fn mark_syncing(&self, local_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE expenses SET sync_status = 'syncing', updated_at = ? WHERE local_id = ?")
            .bind(now.to_rfc3339())
            .bind(local_id.to_string())
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Count of `pending`/`failed` expenses created before `cutoff`.
    pub async fn count_stale(&self, cutoff: DateTime<Utc>) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM expenses WHERE sync_status IN ('pending', 'failed') AND created_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Used by StorageAccountant to reclaim space.
    pub async fn delete_synced_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM expenses WHERE sync_status = 'synced' AND updated_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::LocalStore;
    use chrono::Duration;

    fn sample(job_order_id: Option<&str>, is_overhead: bool) -> Expense {
        let now = Utc::now();
        Expense {
            local_id: Uuid::new_v4(),
            server_id: None,
            amount_minor_units: 1500,
            category: ExpenseCategory::Meals,
            description: None,
            vendor_name: Some("Diner".into()),
            vendor_id: None,
            job_order_id: job_order_id.map(String::from),
            is_overhead,
            expense_date: now,
            expense_time: None,
            gps: None,
            receipt_local_id: None,
            sync_status: SyncStatus::Pending,
            sync_error: None,
            sync_attempts: 0,
            approval_status: ApprovalStatus::Draft,
            created_at: now,
            updated_at: now,
            last_attempt_at: None,
        }
    }

    #[tokio::test]
    async fn rejects_invalid_job_binding() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let invalid = sample(Some("JO-1"), true); // job_order_id set AND is_overhead: violates invariant 6
        assert!(matches!(store.expenses().add(&invalid).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn add_and_get_round_trips() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let expense = sample(None, true);
        store.expenses().add(&expense).await.unwrap();

        let fetched = store.expenses().get(expense.local_id).await.unwrap().unwrap();
        assert_eq!(fetched.local_id, expense.local_id);
        assert_eq!(fetched.amount_minor_units, 1500);
    }

    #[tokio::test]
    async fn duplicate_local_id_is_rejected() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let expense = sample(None, true);
        store.expenses().add(&expense).await.unwrap();
        assert!(matches!(store.expenses().add(&expense).await, Err(Error::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn mark_synced_then_retry_then_failed_transitions() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let expense = sample(None, true);
        store.expenses().add(&expense).await.unwrap();
        let now = Utc::now();

        store.expenses().mark_retry(expense.local_id, "timeout", 1, now).await.unwrap();
        let fetched = store.expenses().get(expense.local_id).await.unwrap().unwrap();
        assert_eq!(fetched.sync_status, SyncStatus::Pending);
        assert_eq!(fetched.sync_attempts, 1);

        store.expenses().mark_failed(expense.local_id, "still failing", 5, now).await.unwrap();
        let fetched = store.expenses().get(expense.local_id).await.unwrap().unwrap();
        assert_eq!(fetched.sync_status, SyncStatus::Failed);

        store.expenses().mark_synced(expense.local_id, "srv-1", now).await.unwrap();
        let fetched = store.expenses().get(expense.local_id).await.unwrap().unwrap();
        assert_eq!(fetched.sync_status, SyncStatus::Synced);
        assert_eq!(fetched.server_id.as_deref(), Some("srv-1"));
    }

    #[tokio::test]
    async fn mark_synced_on_missing_record_is_not_found() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let err = store.expenses().mark_synced(Uuid::new_v4(), "srv-1", Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn by_job_order_filters_correctly() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.expenses().add(&sample(Some("JO-1"), false)).await.unwrap();
        store.expenses().add(&sample(Some("JO-2"), false)).await.unwrap();
        store.expenses().add(&sample(None, true)).await.unwrap();

        let jo1 = store.expenses().by_job_order("JO-1").await.unwrap();
        assert_eq!(jo1.len(), 1);
    }

    #[tokio::test]
    async fn count_stale_counts_old_pending_and_failed_only() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut old = sample(None, true);
        old.created_at = Utc::now() - Duration::days(10);
        store.expenses().add(&old).await.unwrap();
        store.expenses().add(&sample(None, true)).await.unwrap();

        let cutoff = Utc::now() - Duration::days(1);
        assert_eq!(store.expenses().count_stale(cutoff).await.unwrap(), 1);
        assert_eq!(store.expenses().count_all().await.unwrap(), 2);
    }
}
