//! Per-level occupancy built during the steady-state pass

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use evpark_common::db::ENTER_TIME_FORMAT;
use evpark_common::{Plate, PowertrainType};
use serde::Serialize;

/// Vehicle counts of one level (or the whole lot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCount {
    pub total: usize,
    pub ev: usize,
    pub general: usize,
}

/// A located vehicle as published to the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParkedVehicle {
    /// Plate split into prefix, class character, serial
    pub carnum: [String; 3],
    #[serde(rename = "powerTrainType")]
    pub powertrain: PowertrainType,
    #[serde(rename = "enterTs")]
    pub enter_ts: String,
}

/// Who is parked where, from one pass
///
/// Locations are numbered per pillar (`B2-3-1`, `B2-3-2`, …) in the order
/// vehicles were seen. Vehicles of unknown powertrain count toward totals
/// only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OccupancySummary {
    pub all: LevelCount,
    pub levels: BTreeMap<String, LevelCount>,
    pub ev: BTreeMap<String, ParkedVehicle>,
    pub general: BTreeMap<String, ParkedVehicle>,
    #[serde(skip)]
    location_counter: HashMap<String, usize>,
}

impl OccupancySummary {
    pub fn record(
        &mut self,
        plate_number: &str,
        powertrain: PowertrainType,
        enter_time: NaiveDateTime,
        location: &str,
        level: &str,
    ) {
        let counter = self.location_counter.entry(location.to_string()).or_default();
        *counter += 1;
        let numbered_location = format!("{location}-{counter}");

        let vehicle = ParkedVehicle {
            carnum: split_plate(plate_number),
            powertrain,
            enter_ts: enter_time.format(ENTER_TIME_FORMAT).to_string(),
        };

        let level = self.levels.entry(level.to_string()).or_default();
        self.all.total += 1;
        level.total += 1;

        if powertrain.is_electric() {
            self.all.ev += 1;
            level.ev += 1;
            self.ev.insert(numbered_location, vehicle);
        } else if powertrain == PowertrainType::Ice {
            self.all.general += 1;
            level.general += 1;
            self.general.insert(numbered_location, vehicle);
        }
    }
}

fn split_plate(plate_number: &str) -> [String; 3] {
    match Plate::parse(plate_number) {
        Ok(plate) => {
            let segments = plate.segments();
            [
                segments.prefix.to_string(),
                segments.class.to_string(),
                segments.serial.to_string(),
            ]
        }
        Err(_) => [plate_number.to_string(), String::new(), String::new()],
    }
}
