//! Backfill of vehicles the cameras missed
//!
//! Scans a range of 4-digit suffixes and starts monitoring every reported
//! vehicle that is not monitored yet, taking the enter time from the
//! vendor's `parkingTime`.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use chrono::Local;
use evpark_common::{Plate, PowertrainType};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::Reconciler;
use crate::error::ReconcileError;
use crate::store::{CommitSummary, StoreOp};
use crate::vendor::LookupOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub run_id: Uuid,
    pub scanned: usize,
    pub unavailable: usize,
    /// Plates that started monitoring
    pub added: Vec<String>,
    pub already_monitored: usize,
    pub transient_skipped: usize,
    /// Vendor plates failing the grammar
    pub invalid: usize,
    pub commit: CommitSummary,
}

impl Reconciler {
    /// Scan `suffixes` (e.g. `0..=9999`) and monitor unmonitored vehicles
    ///
    /// Shares the single-flight lock with reconciliation passes.
    pub async fn backfill(&self, suffixes: RangeInclusive<u16>) -> Result<BackfillReport, ReconcileError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| ReconcileError::AlreadyRunning)?;

        let run_id = Uuid::new_v4();
        let now = Local::now().naive_local();
        info!(%run_id, from = suffixes.start(), to = suffixes.end(), "Backfill started");

        let mut monitored: HashSet<String> = self
            .store
            .list_entries()
            .await?
            .into_iter()
            .map(|e| e.plate_number)
            .collect();

        let lookups = self
            .lookup_all(suffixes.map(|n| format!("{n:04}")))
            .await;

        let mut report = BackfillReport {
            run_id,
            scanned: lookups.len(),
            unavailable: lookups.unavailable,
            added: Vec::new(),
            already_monitored: 0,
            transient_skipped: 0,
            invalid: 0,
            commit: CommitSummary::default(),
        };
        let mut ops = Vec::new();

        let mut answers: Vec<_> = lookups.outcomes.iter().collect();
        answers.sort_by(|a, b| a.0.cmp(b.0));

        for (_, outcome) in answers {
            let LookupOutcome::Reported(cars) = outcome else {
                continue;
            };
            for car in cars {
                if self.settings.is_disallowed(&car.location) {
                    report.transient_skipped += 1;
                    continue;
                }
                let plate = match Plate::parse(&car.car_no) {
                    Ok(plate) => plate,
                    Err(e) => {
                        warn!(car_no = %car.car_no, error = %e, "Skipping vendor plate");
                        report.invalid += 1;
                        continue;
                    }
                };
                if monitored.contains(plate.as_str()) {
                    report.already_monitored += 1;
                    continue;
                }

                let powertrain = self
                    .store
                    .find_vehicle(plate.as_str())
                    .await?
                    .map_or(PowertrainType::Unknown, |v| v.powertrain);
                let enter_time = car.parked_at().unwrap_or_else(|| {
                    warn!(plate = %plate, parking_time = %car.parking_time, "Unparseable parkingTime, using now");
                    now
                });
                let position = (!car.location.trim().is_empty()).then(|| car.location.clone());

                ops.push(StoreOp::StartMonitoring {
                    plate: plate.to_string(),
                    powertrain,
                    enter_time,
                    position,
                });
                monitored.insert(plate.to_string());
                report.added.push(plate.to_string());
            }
        }

        report.commit = self.store.commit(&ops).await?;
        info!(
            %run_id,
            scanned = report.scanned,
            added = report.added.len(),
            unavailable = report.unavailable,
            "Backfill finished"
        );
        Ok(report)
    }
}
