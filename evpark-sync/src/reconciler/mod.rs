//! Lifecycle reconciliation
//!
//! One pass merges three views of the lot into the monitoring store:
//! vehicles already monitored, pending evidence from the cameras, and the
//! vendor's suffix lookups.
//!
//! - steady state: monitored vehicles get position updates, or are removed
//!   when a trusted answer no longer lists their full plate
//! - entry: pending cases whose full plate the vendor reports are confirmed;
//!   unmatched cases past the auto-exit window are cancelled, whether or not
//!   the vendor answered
//!
//! Every store write of a pass commits in one batch. Evidence only moves
//! after that batch commits, so a failed pass leaves its cases pending.

mod backfill;
mod ghosts;
pub mod occupancy;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use evpark_common::db::monitoring::MonitoringEntry;
use evpark_common::{Config, EvidenceStore, PendingCase, PowertrainType};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ReconcileError;
use crate::store::{CommitSummary, MonitoringStore, StoreOp};
use crate::vendor::{LocationLookup, LookupOutcome};

pub use backfill::BackfillReport;
pub use ghosts::GhostReport;
pub use occupancy::{LevelCount, OccupancySummary, ParkedVehicle};

/// Reconciler knobs taken from the loaded configuration
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub auto_exit: chrono::Duration,
    pub disallowed_locations: Vec<String>,
    pub max_concurrent_lookups: usize,
}

impl ReconcilerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_exit: chrono::Duration::minutes(config.reconciler.auto_exit_minutes),
            disallowed_locations: config.vendor.disallowed_locations.clone(),
            max_concurrent_lookups: config.vendor.max_concurrent_lookups.max(1),
        }
    }

    /// Transient slots (tower, elevator) are never stored as a position
    pub fn is_disallowed(&self, location: &str) -> bool {
        let location = location.trim();
        self.disallowed_locations.iter().any(|d| d == location)
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub started_at: NaiveDateTime,
    pub duration_ms: u64,
    pub monitored: usize,
    pub pending: usize,
    pub lookups: usize,
    pub unavailable_lookups: usize,
    pub avg_lookup_ms: f64,
    pub confirmed: usize,
    pub cancelled: usize,
    pub still_pending: usize,
    pub exits: usize,
    pub positions_updated: usize,
    /// Monitored vehicles reported at a disallowed location
    pub transient_skipped: usize,
    pub evidence_move_failures: usize,
    pub commit: CommitSummary,
    pub occupancy: OccupancySummary,
}

/// Answers for every distinct suffix of a pass
#[derive(Debug, Default)]
pub(crate) struct LookupTable {
    outcomes: HashMap<String, LookupOutcome>,
    total_time: Duration,
    unavailable: usize,
}

impl LookupTable {
    fn get(&self, suffix: &str) -> Option<&LookupOutcome> {
        self.outcomes.get(suffix)
    }

    fn len(&self) -> usize {
        self.outcomes.len()
    }

    fn avg_ms(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.total_time.as_secs_f64() * 1000.0 / self.outcomes.len() as f64
        }
    }
}

#[derive(Debug, Default)]
struct PassPlan {
    ops: Vec<StoreOp>,
    confirm: Vec<PendingCase>,
    cancel: Vec<PendingCase>,
    still_pending: usize,
    exits: usize,
    positions_updated: usize,
    transient_skipped: usize,
    occupancy: OccupancySummary,
}

/// Single-flight reconciliation engine
pub struct Reconciler {
    store: MonitoringStore,
    evidence: Arc<EvidenceStore>,
    vendor: Arc<dyn LocationLookup>,
    settings: ReconcilerSettings,
    running: Mutex<()>,
    last_report: RwLock<Option<PassReport>>,
}

impl Reconciler {
    pub fn new(
        store: MonitoringStore,
        evidence: Arc<EvidenceStore>,
        vendor: Arc<dyn LocationLookup>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            evidence,
            vendor,
            settings,
            running: Mutex::new(()),
            last_report: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &MonitoringStore {
        &self.store
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.evidence
    }

    /// True while a pass or backfill holds the single-flight lock
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    pub async fn last_report(&self) -> Option<PassReport> {
        self.last_report.read().await.clone()
    }

    /// Run one pass against the current local time
    pub async fn run_pass(&self) -> Result<PassReport, ReconcileError> {
        self.run_pass_at(Local::now().naive_local()).await
    }

    /// Run one pass treating `now` as the current time
    ///
    /// Fails with [`ReconcileError::AlreadyRunning`] instead of waiting when
    /// another pass is in progress.
    pub async fn run_pass_at(&self, now: NaiveDateTime) -> Result<PassReport, ReconcileError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| ReconcileError::AlreadyRunning)?;

        let started = Instant::now();
        let pass_id = Uuid::new_v4();
        info!(%pass_id, "Reconciliation pass started");

        let entries = self.store.list_entries().await?;
        let evidence = Arc::clone(&self.evidence);
        let pending = tokio::task::spawn_blocking(move || evidence.list_pending()).await??;

        let suffixes: BTreeSet<String> = entries
            .iter()
            .filter_map(|e| entry_suffix(&e.plate_number))
            .chain(pending.iter().map(|c| c.name.plate.suffix().to_string()))
            .collect();
        let lookups = self.lookup_all(suffixes).await;

        let mut plan = PassPlan::default();
        self.plan_steady_state(&entries, &lookups, &mut plan);
        let monitored: HashSet<&str> = entries.iter().map(|e| e.plate_number.as_str()).collect();
        let pending_total = pending.len();
        self.plan_entries(pending, &lookups, now, &monitored, &mut plan).await?;

        // nothing moves unless the batch is durable
        let commit = self.store.commit(&plan.ops).await?;

        let confirmed = plan.confirm.len();
        let cancelled = plan.cancel.len();
        let evidence_move_failures = self.move_evidence(plan.confirm, plan.cancel).await?;

        let report = PassReport {
            pass_id,
            started_at: now,
            duration_ms: started.elapsed().as_millis() as u64,
            monitored: entries.len(),
            pending: pending_total,
            lookups: lookups.len(),
            unavailable_lookups: lookups.unavailable,
            avg_lookup_ms: lookups.avg_ms(),
            confirmed,
            cancelled,
            still_pending: plan.still_pending,
            exits: plan.exits,
            positions_updated: plan.positions_updated,
            transient_skipped: plan.transient_skipped,
            evidence_move_failures,
            commit,
            occupancy: plan.occupancy,
        };

        info!(
            %pass_id,
            monitored = report.monitored,
            pending = report.pending,
            confirmed,
            cancelled,
            exits = report.exits,
            positions_updated = report.positions_updated,
            lookups = report.lookups,
            unavailable = report.unavailable_lookups,
            avg_lookup_ms = report.avg_lookup_ms,
            duration_ms = report.duration_ms,
            "Reconciliation pass finished"
        );

        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    /// One vendor call per distinct suffix, bounded and rate limited
    pub(crate) async fn lookup_all<I>(&self, suffixes: I) -> LookupTable
    where
        I: IntoIterator<Item = String>,
    {
        let vendor = &self.vendor;
        let results: Vec<(String, LookupOutcome, Duration)> = stream::iter(suffixes)
            .map(|suffix| async move {
                let started = Instant::now();
                let outcome = vendor.lookup(&suffix).await;
                (suffix, outcome, started.elapsed())
            })
            .buffer_unordered(self.settings.max_concurrent_lookups)
            .collect()
            .await;

        let mut table = LookupTable::default();
        for (suffix, outcome, elapsed) in results {
            table.total_time += elapsed;
            if !outcome.is_reported() {
                table.unavailable += 1;
            }
            table.outcomes.insert(suffix, outcome);
        }
        table
    }

    fn plan_steady_state(&self, entries: &[MonitoringEntry], lookups: &LookupTable, plan: &mut PassPlan) {
        for entry in entries {
            let plate = entry.plate_number.as_str();
            let outcome = match entry_suffix(plate).and_then(|s| lookups.get(&s)) {
                Some(outcome) if outcome.is_reported() => outcome,
                _ => {
                    debug!(plate, "No trusted vendor answer, keeping entry");
                    continue;
                }
            };

            let Some(car) = outcome.find(plate) else {
                info!(plate, "Vehicle no longer reported, exiting");
                plan.ops.push(StoreOp::StopMonitoring {
                    plate: plate.to_string(),
                });
                plan.exits += 1;
                continue;
            };

            plan.occupancy.record(
                plate,
                entry.powertrain.unwrap_or(PowertrainType::Unknown),
                entry.enter_time,
                &car.location,
                &car.level_no,
            );

            if self.settings.is_disallowed(&car.location) {
                debug!(plate, location = %car.location, "Transient location, leaving entry as is");
                plan.transient_skipped += 1;
                continue;
            }

            if entry.parking_position.as_deref() != Some(car.location.as_str()) {
                debug!(
                    plate,
                    from = ?entry.parking_position,
                    to = %car.location,
                    "Parking position changed"
                );
                plan.ops.push(StoreOp::UpdatePosition {
                    plate: plate.to_string(),
                    position: car.location.clone(),
                });
                plan.positions_updated += 1;
            }
        }
    }

    async fn plan_entries(
        &self,
        pending: Vec<PendingCase>,
        lookups: &LookupTable,
        now: NaiveDateTime,
        monitored: &HashSet<&str>,
        plan: &mut PassPlan,
    ) -> Result<(), ReconcileError> {
        // powertrain chosen earlier in this pass for plates seen twice
        let mut decided: HashMap<String, PowertrainType> = HashMap::new();

        for case in pending {
            let plate = case.name.plate.as_str().to_string();
            let outcome = lookups.get(case.name.plate.suffix());

            if let Some(car) = outcome.and_then(|o| o.find(&plate)) {
                let tag_type = case.name.tag.powertrain_type();
                let powertrain = match decided.get(&plate) {
                    Some(known) => *known,
                    None => self.known_powertrain(&plate, &case).await?.unwrap_or(tag_type),
                };
                decided.insert(plate.clone(), powertrain);

                let position = (!car.location.trim().is_empty() && !self.settings.is_disallowed(&car.location))
                    .then(|| car.location.clone());

                info!(
                    plate = %plate,
                    powertrain = %powertrain,
                    position = ?position,
                    already_monitored = monitored.contains(plate.as_str()),
                    "Entry confirmed"
                );
                plan.ops.push(StoreOp::RegisterVehicle {
                    plate: plate.clone(),
                    powertrain: tag_type,
                });
                plan.ops.push(StoreOp::StartMonitoring {
                    plate,
                    powertrain,
                    enter_time: case.name.captured_at,
                    position,
                });
                plan.confirm.push(case);
                continue;
            }

            // an untrusted answer counts as not found for expiry
            let age = now.signed_duration_since(case.name.captured_at);
            if age > self.settings.auto_exit {
                info!(
                    plate = %plate,
                    age_minutes = age.num_minutes(),
                    vendor_available = outcome.is_some_and(LookupOutcome::is_reported),
                    "No vendor match within the auto-exit window, cancelling"
                );
                plan.cancel.push(case);
            } else {
                plan.still_pending += 1;
            }
        }

        Ok(())
    }

    /// Registered powertrain for a plate, warning when it contradicts the case
    async fn known_powertrain(
        &self,
        plate: &str,
        case: &PendingCase,
    ) -> Result<Option<PowertrainType>, ReconcileError> {
        let Some(known) = self.store.find_vehicle(plate).await? else {
            return Ok(None);
        };

        if let Some(known_tag) = known.powertrain.tag() {
            if known_tag != case.name.tag {
                warn!(
                    plate,
                    registered = %known.powertrain,
                    evidence = %case.name.tag,
                    "Evidence tag disagrees with registered powertrain, keeping registered"
                );
            }
        }
        Ok(Some(known.powertrain))
    }

    /// Move committed cases out of pending; returns the number of failed moves
    async fn move_evidence(
        &self,
        confirm: Vec<PendingCase>,
        cancel: Vec<PendingCase>,
    ) -> Result<usize, ReconcileError> {
        if confirm.is_empty() && cancel.is_empty() {
            return Ok(0);
        }

        let evidence = Arc::clone(&self.evidence);
        let failures = tokio::task::spawn_blocking(move || {
            let mut failures = 0usize;
            for case in &confirm {
                if let Err(e) = evidence.move_to_confirmed(case) {
                    warn!(plate = %case.name.plate, error = %e, "Failed to move case to confirmed");
                    failures += 1;
                }
            }
            for case in &cancel {
                if let Err(e) = evidence.move_to_misrecognized(case) {
                    warn!(plate = %case.name.plate, error = %e, "Failed to move case to misrecognized");
                    failures += 1;
                }
            }
            failures
        })
        .await?;

        Ok(failures)
    }
}

/// Vendor key of a stored plate; `None` when it does not end in four digits
fn entry_suffix(plate_number: &str) -> Option<String> {
    let chars: Vec<char> = plate_number.trim().chars().collect();
    if chars.len() < 4 {
        return None;
    }
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    suffix.chars().all(|c| c.is_ascii_digit()).then_some(suffix)
}
