//! Dashboard telemetry
//!
//! Payloads are `{ts, values}` JSON objects with `ts` in epoch milliseconds.
//! Publishing is best effort: a failed post is logged and dropped.

use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeZone};
use evpark_common::config::TelemetryConfig;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::reconciler::{GhostReport, OccupancySummary};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPayload {
    pub ts: i64,
    pub values: Value,
}

impl TelemetryPayload {
    pub fn now(values: Value) -> Self {
        Self {
            ts: Local::now().timestamp_millis(),
            values,
        }
    }
}

/// Vehicle counts: `all_*` plus `<level>_total`, `<level>_ev`, `<level>_general`
pub fn occupancy_counts(summary: &OccupancySummary) -> TelemetryPayload {
    let mut values = Map::new();
    values.insert("all_total".to_string(), json!(summary.all.total));
    values.insert("all_ev".to_string(), json!(summary.all.ev));
    values.insert("all_general".to_string(), json!(summary.all.general));
    for (level, count) in &summary.levels {
        values.insert(format!("{level}_total"), json!(count.total));
        values.insert(format!("{level}_ev"), json!(count.ev));
        values.insert(format!("{level}_general"), json!(count.general));
    }
    TelemetryPayload::now(Value::Object(values))
}

/// Numbered locations split into `ev` and `general`
pub fn occupancy_locations(summary: &OccupancySummary) -> TelemetryPayload {
    TelemetryPayload::now(json!({
        "ev": summary.ev,
        "general": summary.general,
    }))
}

/// Ghost ratio, stamped with the minute it describes
pub fn ghost_ratio(report: &GhostReport) -> TelemetryPayload {
    TelemetryPayload {
        ts: local_millis(report.minute),
        values: json!({
            "entered": report.entered,
            "remain": report.remain,
            "total": report.total,
            "ghost_ratio": report.ghost_ratio,
        }),
    }
}

fn local_millis(at: NaiveDateTime) -> i64 {
    Local
        .from_local_datetime(&at)
        .earliest()
        .map_or_else(|| at.and_utc().timestamp_millis(), |t| t.timestamp_millis())
}

/// Optional HTTP sink
pub struct TelemetrySink {
    client: reqwest::Client,
    url: Option<String>,
}

impl TelemetrySink {
    pub fn new(config: &TelemetryConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone().filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Post one payload; returns whether it was delivered
    pub async fn publish(&self, payload: &TelemetryPayload) -> bool {
        let Some(url) = &self.url else {
            return false;
        };

        match self.client.post(url).json(payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(ts = payload.ts, "Telemetry published");
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), "Telemetry sink rejected payload");
                false
            }
            Err(e) => {
                warn!(error = %e, "Telemetry post failed");
                false
            }
        }
    }
}
