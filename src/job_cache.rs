// job_cache.rs - periodic refresh of read-only reference data: a bounded
// GET against the remote port, then a bulk upsert into the local cache.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::local_store::LocalStore;
use crate::ports::RecordStore;
use crate::types::CachedJobOrder;

#[derive(Deserialize)]
struct RemoteJobOrder {
    job_number: String,
    customer_name: String,
    origin: String,
    destination: String,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

pub struct JobCache {
    store: Arc<LocalStore>,
    record_store: Arc<dyn RecordStore>,
    config: EngineConfig,
}

impl JobCache {
    pub fn new(store: Arc<LocalStore>, record_store: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        Self { store, record_store, config }
    }

    /// Fetch active job orders from the remote store (bounded page size) and
    /// upsert them into `job_orders`.
    pub async fn refresh(&self) -> Result<u64> {
        let filter = json!({ "status": "active", "limit": self.config.job_page_limit });
        let rows = self.record_store.select("job_orders", filter).await?;
        let now = Utc::now();

        let orders = rows
            .into_iter()
            .filter_map(|row| serde_json::from_value::<RemoteJobOrder>(row).ok())
            .map(|r| CachedJobOrder {
                job_number: r.job_number,
                customer_name: r.customer_name,
                origin: r.origin,
                destination: r.destination,
                coordinates: match (r.latitude, r.longitude) {
                    (Some(lat), Some(lon)) => Some((lat, lon)),
                    _ => None,
                },
                cached_at: now,
            })
            .collect::<Vec<_>>();

        let count = orders.len() as u64;
        self.store.job_orders().bulk_put(&orders).await?;

        tracing::debug!("refreshed {} cached job orders", count);
        Ok(count)
    }

    /// Case-insensitive substring match over job number and customer name,
    /// capped at 20 results.
    pub async fn search(&self, query: &str) -> Result<Vec<CachedJobOrder>> {
        self.store.job_orders().search(query).await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.store.job_orders().clear().await
    }

    pub async fn count(&self) -> Result<i64> {
        self.store.job_orders().count().await
    }

    /// Whether the cache is stale: empty, or its oldest entry predates
    /// `job_cache_stale_after`.
    pub async fn is_stale(&self) -> Result<bool> {
        let oldest = self.store.job_orders().oldest_cached_at().await?;
        let Some(oldest) = oldest else {
            return Ok(true);
        };

        let age = Utc::now().signed_duration_since(oldest);
        let threshold = chrono::Duration::from_std(self.config.job_cache_stale_after).unwrap_or_default();
        Ok(age > threshold)
    }
}
