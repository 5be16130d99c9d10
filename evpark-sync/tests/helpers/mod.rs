//! Shared fixtures for evpark-sync integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use evpark_common::{Config, EvidenceLayout, EvidenceName, EvidenceStore, Plate, PowertrainTag};
use evpark_sync::reconciler::{Reconciler, ReconcilerSettings};
use evpark_sync::store::{CommitPolicy, MonitoringStore};
use evpark_sync::vendor::{LocationLookup, LookupOutcome, VendorCar};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Scripted vendor: answers per suffix, `Reported([])` for unknown suffixes
#[derive(Default)]
pub struct FakeVendor {
    answers: Mutex<HashMap<String, LookupOutcome>>,
    calls: Mutex<Vec<String>>,
    gate: Option<Gate>,
}

/// Holds every lookup until released
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

impl FakeVendor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Gate {
                entered: Notify::new(),
                release: Notify::new(),
            }),
            ..Self::default()
        }
    }

    pub fn gate(&self) -> &Gate {
        self.gate.as_ref().expect("vendor is not gated")
    }

    pub fn report(&self, suffix: &str, cars: Vec<VendorCar>) {
        self.answers
            .lock()
            .unwrap()
            .insert(suffix.to_string(), LookupOutcome::Reported(cars));
    }

    pub fn unavailable(&self, suffix: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(suffix.to_string(), LookupOutcome::Unavailable("vendor down".to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocationLookup for FakeVendor {
    async fn lookup(&self, suffix: &str) -> LookupOutcome {
        self.calls.lock().unwrap().push(suffix.to_string());
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.answers
            .lock()
            .unwrap()
            .get(suffix)
            .cloned()
            .unwrap_or(LookupOutcome::Reported(Vec::new()))
    }
}

pub fn car(plate: &str, location: &str, level: &str) -> VendorCar {
    VendorCar {
        car_no: plate.to_string(),
        location: location.to_string(),
        level_no: level.to_string(),
        parking_time: "20240105093000".to_string(),
    }
}

/// 2024-01-05 at the given time
pub fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 5)
        .unwrap()
        .and_hms_opt(hour, minute, second)
        .unwrap()
}

pub struct Site {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub evidence: Arc<EvidenceStore>,
    pub vendor: Arc<FakeVendor>,
    pub reconciler: Arc<Reconciler>,
}

pub fn fast_policy() -> CommitPolicy {
    CommitPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    }
}

impl Site {
    pub async fn new(vendor: FakeVendor) -> Self {
        Self::with_cap(vendor, 100).await
    }

    pub async fn with_cap(vendor: FakeVendor, misrecognized_cap: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = evpark_common::db::init_database_pool(&dir.path().join("evpark.db"))
            .await
            .unwrap();
        Self::with_pool(dir, pool, vendor, misrecognized_cap)
    }

    pub fn with_pool(dir: TempDir, pool: SqlitePool, vendor: FakeVendor, misrecognized_cap: usize) -> Self {
        let layout = EvidenceLayout::under(dir.path());
        layout.create_dirs().unwrap();
        let evidence = Arc::new(EvidenceStore::new(layout, misrecognized_cap));
        let vendor = Arc::new(vendor);
        let reconciler = Arc::new(Reconciler::new(
            MonitoringStore::new(pool.clone(), fast_policy()),
            Arc::clone(&evidence),
            vendor.clone(),
            ReconcilerSettings::from_config(&Config::default()),
        ));

        Self {
            dir,
            pool,
            evidence,
            vendor,
            reconciler,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Drop a pending case as the camera pipeline would
    pub fn pending(&self, plate: &str, tag: PowertrainTag, captured_at: NaiveDateTime) -> EvidenceName {
        let name = EvidenceName::new(Plate::parse(plate).unwrap(), tag, captured_at);
        self.evidence.save_pending(&name, b"jpeg", b"{}").unwrap();
        name
    }
}
