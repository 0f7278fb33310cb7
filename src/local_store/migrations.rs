// local_store/migrations.rs - schema migrations, modeled on numbered, idempotent steps.

use crate::Result;
use sqlx::SqlitePool;

/// Run all local store migrations. Idempotent and safe to run multiple times.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    run_if_needed(pool, 1, "create_expenses_table").await?;
    run_if_needed(pool, 2, "create_receipts_table").await?;
    run_if_needed(pool, 3, "create_sync_queue_table").await?;
    run_if_needed(pool, 4, "create_job_orders_table").await?;
    run_if_needed(pool, 5, "create_indices").await?;

    Ok(())
}

async fn run_if_needed(pool: &SqlitePool, id: i32, name: &str) -> Result<()> {
    let exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _migrations WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;

    if exists.0 == 0 {
        tracing::info!("Running migration {}: {}", id, name);

        match id {
            1 => create_expenses_table(pool).await?,
            2 => create_receipts_table(pool).await?,
            3 => create_sync_queue_table(pool).await?,
            4 => create_job_orders_table(pool).await?,
            5 => create_indices(pool).await?,
            _ => return Err(crate::Error::Database(format!("unknown migration id: {id}"))),
        }

        sqlx::query("INSERT INTO _migrations (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(pool)
            .await?;
    }

    Ok(())
}

async fn create_expenses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE expenses (
            local_id TEXT PRIMARY KEY,
            server_id TEXT,
            amount_minor_units INTEGER NOT NULL,
            category TEXT NOT NULL,
            description TEXT,
            vendor_name TEXT,
            vendor_id TEXT,
            job_order_id TEXT,
            is_overhead INTEGER NOT NULL,
            expense_date TEXT NOT NULL,
            expense_time TEXT,
            gps_latitude REAL,
            gps_longitude REAL,
            gps_accuracy REAL,
            receipt_local_id TEXT,
            sync_status TEXT NOT NULL,
            sync_error TEXT,
            sync_attempts INTEGER NOT NULL DEFAULT 0,
            approval_status TEXT NOT NULL DEFAULT 'draft',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_attempt_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_receipts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE receipts (
            local_id TEXT PRIMARY KEY,
            server_id TEXT,
            image_bytes BLOB NOT NULL,
            original_filename TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            image_width INTEGER NOT NULL,
            image_height INTEGER NOT NULL,
            ocr_raw_text TEXT,
            ocr_confidence REAL,
            extracted_amount_minor_units INTEGER,
            extracted_amount_confidence REAL,
            extracted_vendor_name TEXT,
            extracted_vendor_confidence REAL,
            extracted_date TEXT,
            extracted_date_confidence REAL,
            sync_status TEXT NOT NULL,
            sync_error TEXT,
            sync_attempts INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sync_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE sync_queue (
            id TEXT PRIMARY KEY,
            item_type TEXT NOT NULL CHECK(item_type IN ('expense', 'receipt')),
            target_local_id TEXT NOT NULL,
            priority INTEGER NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('pending', 'syncing', 'completed', 'failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            last_attempt_at TEXT,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_job_orders_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE job_orders (
            job_number TEXT PRIMARY KEY,
            customer_name TEXT NOT NULL,
            origin TEXT NOT NULL,
            destination TEXT NOT NULL,
            coord_lat REAL,
            coord_lon REAL,
            cached_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indices(pool: &SqlitePool) -> Result<()> {
    sqlx::query("CREATE INDEX idx_expenses_sync_status ON expenses(sync_status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_expenses_created_at ON expenses(created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_expenses_job_order_id ON expenses(job_order_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_expenses_server_id ON expenses(server_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX idx_receipts_sync_status ON receipts(sync_status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_receipts_created_at ON receipts(created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_receipts_server_id ON receipts(server_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX idx_sync_queue_status ON sync_queue(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_sync_queue_priority ON sync_queue(priority)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_sync_queue_type_target ON sync_queue(item_type, target_local_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_sync_queue_created_at ON sync_queue(created_at)")
        .execute(pool)
        .await?;

    // At most one non-terminal queue item per (type, target).
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX idx_sync_queue_unique_active
        ON sync_queue(item_type, target_local_id)
        WHERE status IN ('pending', 'syncing')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX idx_job_orders_job_number ON job_orders(job_number)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_job_orders_cached_at ON job_orders(cached_at)")
        .execute(pool)
        .await?;

    Ok(())
}
