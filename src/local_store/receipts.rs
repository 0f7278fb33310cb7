// local_store/receipts.rs - typed access to the `receipts` collection.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{OcrArtifact, Receipt, SyncStatus};

#[derive(sqlx::FromRow)]
struct ReceiptRow {
    local_id: String,
    server_id: Option<String>,
    image_bytes: Vec<u8>,
    original_filename: String,
    file_size: i64,
    mime_type: String,
    image_width: i32,
    image_height: i32,
    ocr_raw_text: Option<String>,
    ocr_confidence: Option<f64>,
    extracted_amount_minor_units: Option<i64>,
    extracted_amount_confidence: Option<f64>,
    extracted_vendor_name: Option<String>,
    extracted_vendor_confidence: Option<f64>,
    extracted_date: Option<String>,
    extracted_date_confidence: Option<f64>,
    sync_status: String,
    sync_error: Option<String>,
    sync_attempts: i64,
    created_at: String,
}

impl TryFrom<ReceiptRow> for Receipt {
    type Error = Error;

    fn try_from(row: ReceiptRow) -> Result<Self> {
        let ocr = row.ocr_raw_text.map(|raw_text| -> Result<OcrArtifact> {
            Ok(OcrArtifact {
                raw_text,
                confidence: row.ocr_confidence.unwrap_or(0.0),
                extracted_amount_minor_units: row.extracted_amount_minor_units,
                extracted_amount_confidence: row.extracted_amount_confidence,
                extracted_vendor_name: row.extracted_vendor_name,
                extracted_vendor_confidence: row.extracted_vendor_confidence,
                extracted_date: row
                    .extracted_date
                    .as_deref()
                    .map(parse_dt)
                    .transpose()?,
                extracted_date_confidence: row.extracted_date_confidence,
            })
        }).transpose()?;

        Ok(Receipt {
            local_id: Uuid::parse_str(&row.local_id).map_err(|e| Error::Serialization(e.to_string()))?,
            server_id: row.server_id,
            image_bytes: row.image_bytes,
            original_filename: row.original_filename,
            file_size: row.file_size,
            mime_type: row.mime_type,
            image_width: row.image_width,
            image_height: row.image_height,
            ocr,
            sync_status: SyncStatus::parse(&row.sync_status)
                .ok_or_else(|| Error::Serialization(format!("unknown sync_status: {}", row.sync_status)))?,
            sync_error: row.sync_error,
            sync_attempts: row.sync_attempts as u32,
            created_at: parse_dt(&row.created_at)?,
        })
    }
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Typed access to the `receipts` collection.
pub struct ReceiptStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ReceiptStore<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, receipt: &Receipt) -> Result<()> {
        let ocr = receipt.ocr.as_ref();

        let result = sqlx::query(
            r#"
            INSERT INTO receipts (
                local_id, server_id, image_bytes, original_filename, file_size, mime_type,
                image_width, image_height, ocr_raw_text, ocr_confidence,
                extracted_amount_minor_units, extracted_amount_confidence,
                extracted_vendor_name, extracted_vendor_confidence, extracted_date,
                extracted_date_confidence, sync_status, sync_error, sync_attempts, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(receipt.local_id.to_string())
        .bind(&receipt.server_id)
        .bind(&receipt.image_bytes)
        .bind(&receipt.original_filename)
        .bind(receipt.file_size)
        .bind(&receipt.mime_type)
        .bind(receipt.image_width)
        .bind(receipt.image_height)
        .bind(ocr.map(|o| o.raw_text.clone()))
        .bind(ocr.map(|o| o.confidence))
        .bind(ocr.and_then(|o| o.extracted_amount_minor_units))
        .bind(ocr.and_then(|o| o.extracted_amount_confidence))
        .bind(ocr.and_then(|o| o.extracted_vendor_name.clone()))
        .bind(ocr.and_then(|o| o.extracted_vendor_confidence))
        .bind(ocr.and_then(|o| o.extracted_date).map(|d| d.to_rfc3339()))
        .bind(ocr.and_then(|o| o.extracted_date_confidence))
        .bind(receipt.sync_status.as_str())
        .bind(&receipt.sync_error)
        .bind(receipt.sync_attempts as i64)
        .bind(receipt.created_at.to_rfc3339())
        .execute(self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Err(Error::DuplicateKey(receipt.local_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, local_id: Uuid) -> Result<Option<Receipt>> {
        let row: Option<ReceiptRow> = sqlx::query_as("SELECT * FROM receipts WHERE local_id = ?")
            .bind(local_id.to_string())
            .fetch_optional(self.pool)
            .await?;

        row.map(Receipt::try_from).transpose()
    }

    pub async fn by_status(&self, statuses: &[SyncStatus]) -> Result<Vec<Receipt>> {
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!("SELECT * FROM receipts WHERE sync_status IN ({placeholders}) ORDER BY created_at DESC");

        let mut query = sqlx::query_as(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows: Vec<ReceiptRow> = query.fetch_all(self.pool).await?;
        rows.into_iter().map(Receipt::try_from).collect()
    }

    pub async fn all(&self, limit: Option<i64>) -> Result<Vec<Receipt>> {
        let rows: Vec<ReceiptRow> = match limit {
            Some(limit) => sqlx::query_as("SELECT * FROM receipts ORDER BY created_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(self.pool)
                .await?,
            None => sqlx::query_as("SELECT * FROM receipts ORDER BY created_at DESC")
                .fetch_all(self.pool)
                .await?,
        };

        rows.into_iter().map(Receipt::try_from).collect()
    }

    pub async fn count_by_status(&self, status: SyncStatus) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM receipts WHERE sync_status = ?")
            .bind(status.as_str())
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }

    pub async fn count_all(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM receipts").fetch_one(self.pool).await?;
        Ok(count)
    }

    pub async fn mark_synced(&self, local_id: Uuid, server_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE receipts SET server_id = ?, sync_status = 'synced', sync_error = NULL WHERE local_id = ?",
        )
        .bind(server_id)
        .bind(local_id.to_string())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(local_id.to_string()));
        }
        Ok(())
    }

    pub async fn mark_retry(
        &self,
        local_id: Uuid,
        error: &str,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE receipts SET sync_status = 'pending', sync_error = ?, sync_attempts = ? WHERE local_id = ?",
        )
        .bind(error)
        .bind(attempts as i64)
        .bind(local_id.to_string())
        .execute(self.pool)
        .await?;
        let _ = now;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(local_id.to_string()));
        }
        Ok(())
    }

    pub async fn mark_failed(&self, local_id: Uuid, error: &str, attempts: u32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE receipts SET sync_status = 'failed', sync_error = ?, sync_attempts = ? WHERE local_id = ?",
        )
        .bind(error)
        .bind(attempts as i64)
        .bind(local_id.to_string())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(local_id.to_string()));
        }
        Ok(())
    }

    pub async fn mark_syncing(&self, local_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE receipts SET sync_status = 'syncing' WHERE local_id = ?")
            .bind(local_id.to_string())
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Count of `pending`/`failed` receipts created before `cutoff`.
    pub async fn count_stale(&self, cutoff: DateTime<Utc>) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM receipts WHERE sync_status IN ('pending', 'failed') AND created_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    pub async fn delete_synced_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM receipts WHERE sync_status = 'synced' AND created_at < ?")
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

    fn sample() -> Receipt {
        let now = Utc::now();
        Receipt {
            local_id: Uuid::new_v4(),
            server_id: None,
            image_bytes: vec![0xFF, 0xD8, 0xFF],
            original_filename: "img.jpg".into(),
            file_size: 3,
            mime_type: "image/jpeg".into(),
            image_width: 800,
            image_height: 600,
            ocr: None,
            sync_status: SyncStatus::Pending,
            sync_error: None,
            sync_attempts: 0,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn add_and_get_round_trips_including_ocr() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut receipt = sample();
        receipt.ocr = Some(OcrArtifact {
            raw_text: "TOTAL 12.34".into(),
            confidence: 0.9,
            extracted_amount_minor_units: Some(1234),
            extracted_amount_confidence: Some(0.8),
            extracted_vendor_name: Some("Shell".into()),
            extracted_vendor_confidence: Some(0.7),
            extracted_date: Some(receipt.created_at),
            extracted_date_confidence: Some(0.6),
        });
        store.receipts().add(&receipt).await.unwrap();

        let fetched = store.receipts().get(receipt.local_id).await.unwrap().unwrap();
        let ocr = fetched.ocr.unwrap();
        assert_eq!(ocr.raw_text, "TOTAL 12.34");
        assert_eq!(ocr.extracted_amount_minor_units, Some(1234));
    }

    #[tokio::test]
    async fn duplicate_local_id_is_rejected() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let receipt = sample();
        store.receipts().add(&receipt).await.unwrap();
        assert!(matches!(store.receipts().add(&receipt).await, Err(Error::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn status_transitions() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let receipt = sample();
        store.receipts().add(&receipt).await.unwrap();

        store.receipts().mark_syncing(receipt.local_id).await.unwrap();
        assert_eq!(
            store.receipts().get(receipt.local_id).await.unwrap().unwrap().sync_status,
            SyncStatus::Syncing
        );

        store.receipts().mark_synced(receipt.local_id, "srv-1").await.unwrap();
        let fetched = store.receipts().get(receipt.local_id).await.unwrap().unwrap();
        assert_eq!(fetched.sync_status, SyncStatus::Synced);
        assert_eq!(fetched.server_id.as_deref(), Some("srv-1"));
    }

    #[tokio::test]
    async fn count_stale_counts_old_pending_and_failed_only() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut old = sample();
        old.created_at = Utc::now() - Duration::days(10);
        store.receipts().add(&old).await.unwrap();
        store.receipts().add(&sample()).await.unwrap();

        let cutoff = Utc::now() - Duration::days(1);
        assert_eq!(store.receipts().count_stale(cutoff).await.unwrap(), 1);
        assert_eq!(store.receipts().count_all().await.unwrap(), 2);
    }
}
