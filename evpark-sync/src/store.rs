//! Batched writes to the monitoring store
//!
//! A reconciliation pass collects its writes as [`StoreOp`]s and commits them
//! in one transaction. On a transient lock conflict the whole batch is
//! replayed with exponential backoff; a batch that still fails is rolled
//! back, so the tables never hold half a pass.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use evpark_common::config::DatabaseConfig;
use evpark_common::db::{monitoring, vehicles};
use evpark_common::db::monitoring::MonitoringEntry;
use evpark_common::db::vehicles::KnownVehicle;
use evpark_common::{Error, PowertrainType, Result};
use serde::Serialize;
use sqlx::SqlitePool;

/// One write of a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Insert into `car_info` unless the plate is known
    RegisterVehicle {
        plate: String,
        powertrain: PowertrainType,
    },
    /// Insert into `car_monitoring` unless already monitored
    StartMonitoring {
        plate: String,
        powertrain: PowertrainType,
        enter_time: NaiveDateTime,
        position: Option<String>,
    },
    UpdatePosition {
        plate: String,
        position: String,
    },
    /// Vehicle left the lot
    StopMonitoring {
        plate: String,
    },
}

/// Rows actually changed by a committed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub vehicles_registered: usize,
    pub entries_inserted: usize,
    pub positions_updated: usize,
    pub entries_deleted: usize,
    pub attempts: u32,
}

/// Retry bounds for one batch commit
#[derive(Debug, Clone, Copy)]
pub struct CommitPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&DatabaseConfig> for CommitPolicy {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_attempts: config.commit_max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.commit_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.commit_max_backoff_ms),
        }
    }
}

/// Known vehicles and monitored entries
#[derive(Clone)]
pub struct MonitoringStore {
    pool: SqlitePool,
    policy: CommitPolicy,
}

impl MonitoringStore {
    pub fn new(pool: SqlitePool, policy: CommitPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn list_entries(&self) -> Result<Vec<MonitoringEntry>> {
        monitoring::list_entries(&self.pool).await
    }

    pub async fn find_vehicle(&self, plate: &str) -> Result<Option<KnownVehicle>> {
        vehicles::find_vehicle(&self.pool, plate).await
    }

    pub async fn count_entered_in_minute(&self, minute: NaiveDateTime) -> Result<i64> {
        monitoring::count_entered_in_minute(&self.pool, minute).await
    }

    /// Apply every op in one transaction, retrying the batch on lock conflicts
    pub async fn commit(&self, ops: &[StoreOp]) -> Result<CommitSummary> {
        if ops.is_empty() {
            return Ok(CommitSummary::default());
        }

        let mut attempts = 0u32;
        let mut summary = retry_on_conflict("monitoring batch", self.policy, || {
            attempts += 1;
            apply_batch(&self.pool, ops)
        })
        .await?;

        summary.attempts = attempts;
        tracing::info!(
            ops = ops.len(),
            registered = summary.vehicles_registered,
            inserted = summary.entries_inserted,
            updated = summary.positions_updated,
            deleted = summary.entries_deleted,
            attempts,
            "Monitoring batch committed"
        );
        Ok(summary)
    }
}

async fn apply_batch(pool: &SqlitePool, ops: &[StoreOp]) -> Result<CommitSummary> {
    let mut tx = pool.begin().await?;
    let mut summary = CommitSummary::default();

    for op in ops {
        match op {
            StoreOp::RegisterVehicle { plate, powertrain } => {
                if vehicles::insert_vehicle_if_absent(&mut *tx, plate, *powertrain).await? {
                    summary.vehicles_registered += 1;
                }
            }
            StoreOp::StartMonitoring {
                plate,
                powertrain,
                enter_time,
                position,
            } => {
                let inserted = monitoring::insert_entry_if_absent(
                    &mut *tx,
                    plate,
                    *powertrain,
                    *enter_time,
                    position.as_deref(),
                )
                .await?;
                if inserted {
                    summary.entries_inserted += 1;
                }
            }
            StoreOp::UpdatePosition { plate, position } => {
                if monitoring::update_position(&mut *tx, plate, position).await? {
                    summary.positions_updated += 1;
                }
            }
            StoreOp::StopMonitoring { plate } => {
                if monitoring::delete_entry(&mut *tx, plate).await? {
                    summary.entries_deleted += 1;
                }
            }
        }
    }

    // dropping an uncommitted transaction rolls it back
    tx.commit().await?;
    Ok(summary)
}

/// Retry an operation with exponential backoff while it fails transiently
///
/// Non-transient errors are returned at once. After `max_attempts`
/// transient failures the last error is reported as a storage conflict.
pub async fn retry_on_conflict<F, Fut, T>(operation_name: &str, policy: CommitPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            return Err(err);
        }

        if attempt >= policy.max_attempts {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                error = %err,
                "Giving up after repeated lock conflicts"
            );
            return Err(Error::StorageConflict(format!(
                "{operation_name} failed after {attempt} attempts: {err}"
            )));
        }

        let delay = backoff.min(policy.max_backoff);
        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = delay.as_millis() as u64,
            error = %err,
            "Lock conflict, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
        backoff = backoff.saturating_mul(2);
    }
}
