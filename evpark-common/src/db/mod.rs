//! Monitoring store tables
//!
//! Two tables shared by both services: `car_info` (known vehicles,
//! insert-if-absent only) and `car_monitoring` (vehicles believed present).
//! Query functions are generic over the executor so the sync service can run
//! them inside one batch transaction.

pub mod monitoring;
pub mod vehicles;

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::Result;

/// Text format of `car_monitoring.enter_time`
pub const ENTER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Open (creating if needed) the monitoring database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create `car_info` and `car_monitoring` if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS car_info (
            plate_number TEXT PRIMARY KEY,
            powertrain_type_code INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS car_monitoring (
            plate_number TEXT PRIMARY KEY,
            powertrain_type_code INTEGER,
            enter_time TEXT NOT NULL,
            parking_position TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (car_info, car_monitoring)");

    Ok(())
}
