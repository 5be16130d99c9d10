//! Vehicles believed present (`car_monitoring`)
//!
//! Inserts never overwrite an existing `enter_time`; position updates and
//! deletes are idempotent.

use chrono::{Duration, NaiveDateTime, Timelike};
use sqlx::{Executor, Row, Sqlite};

use super::vehicles::decode_powertrain;
use super::ENTER_TIME_FORMAT;
use crate::powertrain::PowertrainType;
use crate::{Error, Result};

/// One row of `car_monitoring`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringEntry {
    pub plate_number: String,
    pub powertrain: Option<PowertrainType>,
    pub enter_time: NaiveDateTime,
    pub parking_position: Option<String>,
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<MonitoringEntry> {
    let plate_number: String = row.get("plate_number");
    let code: Option<i64> = row.get("powertrain_type_code");
    let enter_time: String = row.get("enter_time");
    let enter_time = NaiveDateTime::parse_from_str(&enter_time, ENTER_TIME_FORMAT).map_err(|e| {
        Error::Internal(format!("bad enter_time {enter_time:?} for {plate_number}: {e}"))
    })?;

    Ok(MonitoringEntry {
        powertrain: code.map(|c| decode_powertrain(&plate_number, c)),
        enter_time,
        parking_position: row.get("parking_position"),
        plate_number,
    })
}

/// Full monitored set, ordered by plate
pub async fn list_entries<'e, E>(executor: E) -> Result<Vec<MonitoringEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT plate_number, powertrain_type_code, enter_time, parking_position
         FROM car_monitoring ORDER BY plate_number",
    )
    .fetch_all(executor)
    .await?;

    rows.iter().map(row_to_entry).collect()
}

pub async fn find_entry<'e, E>(executor: E, plate_number: &str) -> Result<Option<MonitoringEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT plate_number, powertrain_type_code, enter_time, parking_position
         FROM car_monitoring WHERE plate_number = ?",
    )
    .bind(plate_number)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_entry).transpose()
}

/// Start monitoring a vehicle unless it is already monitored
///
/// Returns true when a row was inserted.
pub async fn insert_entry_if_absent<'e, E>(
    executor: E,
    plate_number: &str,
    powertrain: PowertrainType,
    enter_time: NaiveDateTime,
    parking_position: Option<&str>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT OR IGNORE INTO car_monitoring
             (plate_number, powertrain_type_code, enter_time, parking_position)
         VALUES (?, ?, ?, ?)",
    )
    .bind(plate_number)
    .bind(i64::from(powertrain.code()))
    .bind(enter_time.format(ENTER_TIME_FORMAT).to_string())
    .bind(parking_position)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Set the parking position; no-op when the plate is not monitored
pub async fn update_position<'e, E>(executor: E, plate_number: &str, position: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE car_monitoring SET parking_position = ? WHERE plate_number = ?")
        .bind(position)
        .bind(plate_number)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Stop monitoring a vehicle; deleting an absent plate is not an error
pub async fn delete_entry<'e, E>(executor: E, plate_number: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM car_monitoring WHERE plate_number = ?")
        .bind(plate_number)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Entries whose enter time falls within the given minute
pub async fn count_entered_in_minute<'e, E>(executor: E, minute: NaiveDateTime) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let start = minute
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(minute);
    let end = start + Duration::minutes(1);

    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM car_monitoring WHERE enter_time >= ? AND enter_time < ?",
    )
    .bind(start.format(ENTER_TIME_FORMAT).to_string())
    .bind(end.format(ENTER_TIME_FORMAT).to_string())
    .fetch_one(executor)
    .await?;

    Ok(row.get("n"))
}
