// local_store/mod.rs - durable on-device storage: one `SqlitePool` in WAL
// mode with foreign keys enabled, migrations run at construction time.

pub mod expenses;
pub mod job_orders;
pub mod migrations;
pub mod receipts;
pub mod sync_queue;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;
use expenses::ExpenseStore;
use job_orders::JobOrderStore;
use receipts::ReceiptStore;
use sync_queue::SyncQueueStore;

/// Durable on-device storage: four logically independent collections behind
/// one connection pool.
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open (creating if missing) the local store at `db_path` and run
    /// migrations.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let db_url = format!("sqlite:{}", db_path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        migrations::run(&pool).await?;

        Ok(Self { pool })
    }

    /// Open an in-memory store, used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        migrations::run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn expenses(&self) -> ExpenseStore<'_> {
        ExpenseStore::new(&self.pool)
    }

    pub fn receipts(&self) -> ReceiptStore<'_> {
        ReceiptStore::new(&self.pool)
    }

    pub fn sync_queue(&self) -> SyncQueueStore<'_> {
        SyncQueueStore::new(&self.pool)
    }

    pub fn job_orders(&self) -> JobOrderStore<'_> {
        JobOrderStore::new(&self.pool)
    }

    pub async fn health_check(&self) -> Result<bool> {
        let (one,): (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}
