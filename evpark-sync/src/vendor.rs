//! Third-party parking location service
//!
//! One POST per 4-digit plate suffix returns every vehicle in the lot whose
//! plate ends in those digits. Only the string status `"200"` with
//! `success == true` is trusted; every other response becomes
//! [`LookupOutcome::Unavailable`], which never exits a monitored vehicle.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use evpark_common::config::VendorConfig;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

/// `parkingTime` as reported by the vendor
pub const PARKING_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// One vehicle in a location response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorCar {
    #[serde(rename = "carNo")]
    pub car_no: String,
    #[serde(default)]
    pub location: String,
    #[serde(rename = "levelNo", default, deserialize_with = "string_or_number")]
    pub level_no: String,
    #[serde(rename = "parkingTime", default, deserialize_with = "string_or_number")]
    pub parking_time: String,
}

impl VendorCar {
    /// Vendor entry time, if it parses
    pub fn parked_at(&self) -> Option<NaiveDateTime> {
        let raw = self.parking_time.trim();
        NaiveDateTime::parse_from_str(raw, PARKING_TIME_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, evpark_common::db::ENTER_TIME_FORMAT))
            .ok()
    }
}

/// Result of one suffix lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Trusted answer; an empty list means no vehicle with that suffix
    Reported(Vec<VendorCar>),
    /// Transport failure, non-200 status, or malformed body
    Unavailable(String),
}

impl LookupOutcome {
    /// The vehicle whose full plate equals `plate`, if reported
    pub fn find(&self, plate: &str) -> Option<&VendorCar> {
        match self {
            LookupOutcome::Reported(cars) => cars.iter().find(|car| car.car_no.trim() == plate),
            LookupOutcome::Unavailable(_) => None,
        }
    }

    pub fn is_reported(&self) -> bool {
        matches!(self, LookupOutcome::Reported(_))
    }
}

/// Suffix lookup seam used by the reconciler
#[async_trait]
pub trait LocationLookup: Send + Sync {
    async fn lookup(&self, suffix: &str) -> LookupOutcome;
}

#[derive(Debug, Serialize)]
struct LocationRequest<'a> {
    #[serde(rename = "lotAreaNo")]
    lot_area_no: i64,
    #[serde(rename = "carNo4Digit")]
    car_no_4_digit: &'a str,
}

#[derive(Debug, Deserialize)]
struct LocationResponse {
    status: serde_json::Value,
    data: Option<LocationData>,
}

#[derive(Debug, Deserialize)]
struct LocationData {
    #[serde(default)]
    success: bool,
    #[serde(rename = "carList", default)]
    car_list: Vec<VendorCar>,
}

/// Interpret a response body under the trust rule
pub fn interpret_response(body: &[u8]) -> LookupOutcome {
    let response: LocationResponse = match serde_json::from_slice(body) {
        Ok(response) => response,
        Err(e) => return LookupOutcome::Unavailable(format!("malformed response: {e}")),
    };

    if response.status.as_str() != Some("200") {
        return LookupOutcome::Unavailable(format!("vendor status {}", response.status));
    }
    match response.data {
        Some(data) if data.success => LookupOutcome::Reported(data.car_list),
        Some(_) => LookupOutcome::Unavailable("vendor reported success=false".to_string()),
        None => LookupOutcome::Unavailable("response has no data".to_string()),
    }
}

/// HTTP client for the location endpoint with basic auth and a rate limit
pub struct VendorClient {
    client: reqwest::Client,
    url: String,
    user_id: String,
    password: String,
    lot_area_no: i64,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl VendorClient {
    pub fn new(config: &VendorConfig) -> Result<Self, reqwest::Error> {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("evpark-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: config.location_url.clone(),
            user_id: config.user_id.clone(),
            password: config.password.clone(),
            lot_area_no: config.lot_area_no,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }
}

#[async_trait]
impl LocationLookup for VendorClient {
    async fn lookup(&self, suffix: &str) -> LookupOutcome {
        self.rate_limiter.until_ready().await;

        let request = LocationRequest {
            lot_area_no: self.lot_area_no,
            car_no_4_digit: suffix,
        };
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user_id, Some(&self.password))
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(suffix, error = %e, "Vendor request failed");
                return LookupOutcome::Unavailable(e.to_string());
            }
        };
        if !response.status().is_success() {
            warn!(suffix, status = %response.status(), "Vendor returned HTTP error");
            return LookupOutcome::Unavailable(format!("HTTP {}", response.status()));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(suffix, error = %e, "Failed to read vendor response");
                return LookupOutcome::Unavailable(e.to_string());
            }
        };

        let outcome = interpret_response(&body);
        match &outcome {
            LookupOutcome::Reported(cars) => debug!(suffix, cars = cars.len(), "Vendor lookup"),
            LookupOutcome::Unavailable(reason) => warn!(suffix, reason = %reason, "Vendor answer not trusted"),
        }
        outcome
    }
}

/// Accept either a JSON string or a JSON number
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(n) => n.to_string(),
        Raw::Null(()) => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_trusted_response_lists_cars() {
        let outcome = interpret_response(&body(json!({
            "status": "200",
            "data": {
                "success": true,
                "carList": [
                    {"carNo": "11나1111", "location": "B2-3", "levelNo": "B2", "parkingTime": "20240105093000"},
                    {"carNo": "22다1111", "location": "B3-7", "levelNo": 3, "parkingTime": "20240105101500"}
                ]
            }
        })));

        let LookupOutcome::Reported(cars) = &outcome else {
            panic!("expected reported, got {outcome:?}");
        };
        assert_eq!(cars.len(), 2);
        assert_eq!(cars[1].level_no, "3");
        assert_eq!(outcome.find("11나1111").map(|c| c.location.as_str()), Some("B2-3"));
        assert!(outcome.find("1111").is_none());
    }

    #[test]
    fn test_only_string_status_is_trusted() {
        let outcome = interpret_response(&body(json!({
            "status": "200",
            "data": {"success": true, "carList": []}
        })));
        assert_eq!(outcome, LookupOutcome::Reported(Vec::new()));

        let outcome = interpret_response(&body(json!({
            "status": 200,
            "data": {"success": true, "carList": []}
        })));
        assert!(matches!(outcome, LookupOutcome::Unavailable(reason) if reason.contains("200")));
    }

    #[test]
    fn test_untrusted_responses_are_unavailable() {
        let failures = [
            body(json!({"status": "500", "data": {"success": true, "carList": []}})),
            body(json!({"status": "200", "data": {"success": false, "carList": []}})),
            body(json!({"status": "200"})),
            b"<html>gateway timeout</html>".to_vec(),
        ];
        for failure in failures {
            assert!(!interpret_response(&failure).is_reported());
        }
    }

    #[test]
    fn test_parking_time_formats() {
        let car = VendorCar {
            car_no: "11나1111".to_string(),
            location: "B2-3".to_string(),
            level_no: "B2".to_string(),
            parking_time: "20240105093000".to_string(),
        };
        assert_eq!(
            car.parked_at().map(|t| t.to_string()),
            Some("2024-01-05 09:30:00".to_string())
        );

        let car = VendorCar {
            parking_time: "yesterday".to_string(),
            ..car
        };
        assert!(car.parked_at().is_none());
    }
}
