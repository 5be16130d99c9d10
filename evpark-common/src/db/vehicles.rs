//! Known vehicles (`car_info`)

use sqlx::{Executor, Row, Sqlite};
use tracing::warn;

use crate::powertrain::PowertrainType;
use crate::Result;

/// A registered vehicle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownVehicle {
    pub plate_number: String,
    pub powertrain: PowertrainType,
}

/// Look up a registered vehicle by its full plate
pub async fn find_vehicle<'e, E>(executor: E, plate_number: &str) -> Result<Option<KnownVehicle>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT plate_number, powertrain_type_code FROM car_info WHERE plate_number = ?",
    )
    .bind(plate_number)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|row| {
        let plate_number: String = row.get("plate_number");
        let code: i64 = row.get("powertrain_type_code");
        KnownVehicle {
            powertrain: decode_powertrain(&plate_number, code),
            plate_number,
        }
    }))
}

/// Register a vehicle unless the plate is already known
///
/// Returns true when a row was inserted. Existing rows are never updated.
pub async fn insert_vehicle_if_absent<'e, E>(
    executor: E,
    plate_number: &str,
    powertrain: PowertrainType,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT OR IGNORE INTO car_info (plate_number, powertrain_type_code) VALUES (?, ?)",
    )
    .bind(plate_number)
    .bind(i64::from(powertrain.code()))
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Map a stored type code, treating codes outside the table as Unknown
pub(crate) fn decode_powertrain(plate_number: &str, code: i64) -> PowertrainType {
    u8::try_from(code)
        .ok()
        .and_then(PowertrainType::from_code)
        .unwrap_or_else(|| {
            warn!(plate = plate_number, code, "Unrecognized powertrain code, treating as Unknown");
            PowertrainType::Unknown
        })
}
