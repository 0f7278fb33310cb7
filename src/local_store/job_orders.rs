// local_store/job_orders.rs - typed access to the `job_orders` reference cache.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::Result;
use crate::types::CachedJobOrder;

#[derive(sqlx::FromRow)]
struct JobOrderRow {
    job_number: String,
    customer_name: String,
    origin: String,
    destination: String,
    coord_lat: Option<f64>,
    coord_lon: Option<f64>,
    cached_at: String,
}

impl TryFrom<JobOrderRow> for CachedJobOrder {
    type Error = crate::Error;

    fn try_from(row: JobOrderRow) -> Result<Self> {
        Ok(CachedJobOrder {
            job_number: row.job_number,
            customer_name: row.customer_name,
            origin: row.origin,
            destination: row.destination,
            coordinates: match (row.coord_lat, row.coord_lon) {
                (Some(lat), Some(lon)) => Some((lat, lon)),
                _ => None,
            },
            cached_at: DateTime::parse_from_rfc3339(&row.cached_at)?.with_timezone(&Utc),
        })
    }
}

pub struct JobOrderStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobOrderStore<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a batch of cached job orders, keyed on `job_number`.
    pub async fn bulk_put(&self, orders: &[CachedJobOrder]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for order in orders {
            sqlx::query(
                r#"
                INSERT INTO job_orders (job_number, customer_name, origin, destination, coord_lat, coord_lon, cached_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(job_number) DO UPDATE SET
                    customer_name = excluded.customer_name,
                    origin = excluded.origin,
                    destination = excluded.destination,
                    coord_lat = excluded.coord_lat,
                    coord_lon = excluded.coord_lon,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(&order.job_number)
            .bind(&order.customer_name)
            .bind(&order.origin)
            .bind(&order.destination)
            .bind(order.coordinates.map(|c| c.0))
            .bind(order.coordinates.map(|c| c.1))
            .bind(order.cached_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Case-insensitive substring search over job number and customer name,
    /// capped at 20 results.
    pub async fn search(&self, query: &str) -> Result<Vec<CachedJobOrder>> {
        let pattern = format!("%{}%", query.to_lowercase());

        let rows: Vec<JobOrderRow> = sqlx::query_as(
            r#"
            SELECT * FROM job_orders
            WHERE lower(job_number) LIKE ? OR lower(customer_name) LIKE ?
            ORDER BY job_number
            LIMIT 20
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(CachedJobOrder::try_from).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_orders")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    pub async fn oldest_cached_at(&self) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT cached_at FROM job_orders ORDER BY cached_at ASC LIMIT 1")
                .fetch_optional(self.pool)
                .await?;

        row.map(|(s,)| Ok(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc)))
            .transpose()
    }

    /// Drop every cached job order.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_orders").execute(self.pool).await?;
        Ok(result.rows_affected())
    }
}
