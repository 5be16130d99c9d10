//! Periodic reconciliation job
//!
//! Each tick runs one pass, publishes its occupancy, then publishes the
//! ghost ratio of the minute [`GHOST_LAG_MINUTES`] ago (late enough for that
//! minute's detections to have had a pass).

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ReconcileError;
use crate::reconciler::Reconciler;
use crate::telemetry::{self, TelemetrySink};

pub const GHOST_LAG_MINUTES: i64 = 10;

/// Run passes every `interval` until cancelled
pub async fn run_scheduler(
    reconciler: Arc<Reconciler>,
    telemetry: Arc<TelemetrySink>,
    interval: Duration,
    last_error: Arc<RwLock<Option<String>>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_secs = interval.as_secs(), "Reconciliation scheduler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = run_tick(&reconciler, &telemetry).await {
                    error!(error = %e, "Scheduled reconciliation failed");
                    *last_error.write().await = Some(e.to_string());
                }
            }
        }
    }

    info!("Reconciliation scheduler stopped");
}

/// One scheduled pass plus its telemetry
pub async fn run_tick(reconciler: &Reconciler, telemetry: &TelemetrySink) -> Result<(), ReconcileError> {
    match reconciler.run_pass().await {
        Ok(report) => {
            if telemetry.is_enabled() {
                telemetry.publish(&telemetry::occupancy_counts(&report.occupancy)).await;
                telemetry.publish(&telemetry::occupancy_locations(&report.occupancy)).await;
            }
        }
        Err(ReconcileError::AlreadyRunning) => {
            info!("Previous pass still running, skipping this tick");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    let minute = Local::now().naive_local() - chrono::Duration::minutes(GHOST_LAG_MINUTES);
    let ghosts = reconciler.ghost_report(minute).await?;
    if telemetry.is_enabled() {
        telemetry.publish(&telemetry::ghost_ratio(&ghosts)).await;
    }
    Ok(())
}
