//! Ghost-vehicle ratio
//!
//! A camera detection that never shows up at the vendor leaves its evidence
//! in pending. For a target minute, `remain / (entered + remain) * 100` is
//! the share of that minute's detections still unconfirmed.

use std::sync::Arc;

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use tracing::debug;

use super::Reconciler;
use crate::error::ReconcileError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GhostReport {
    pub minute: NaiveDateTime,
    /// Monitoring entries whose enter time falls in the minute
    pub entered: i64,
    /// Pending cases captured in the minute
    pub remain: usize,
    pub total: i64,
    pub ghost_ratio: f64,
}

impl GhostReport {
    pub fn new(minute: NaiveDateTime, entered: i64, remain: usize) -> Self {
        let total = entered + remain as i64;
        let ghost_ratio = if remain == 0 || total == 0 {
            0.0
        } else {
            remain as f64 / total as f64 * 100.0
        };
        Self {
            minute,
            entered,
            remain,
            total,
            ghost_ratio,
        }
    }
}

impl Reconciler {
    /// Ghost ratio of the minute containing `minute`
    pub async fn ghost_report(&self, minute: NaiveDateTime) -> Result<GhostReport, ReconcileError> {
        let minute = minute
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(minute);

        let entered = self.store().count_entered_in_minute(minute).await?;
        let evidence = Arc::clone(&self.evidence);
        let remain = tokio::task::spawn_blocking(move || evidence.count_pending_in_minute(minute)).await??;

        let report = GhostReport::new(minute, entered, remain);
        debug!(
            minute = %report.minute,
            entered = report.entered,
            remain = report.remain,
            ghost_ratio = report.ghost_ratio,
            "Ghost ratio computed"
        );
        Ok(report)
    }
}
