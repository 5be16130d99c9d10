//! Evidence output of the camera pipeline
//!
//! - pending cases (full frame JPEG + sidecar) for the reconciler
//! - diagnostic uncertain / error cases under `<dir>/<yyyyMMdd>/<HHMMSS_ffffff>`
//! - the append-only `predictions.jsonl` log, one file per day
//!
//! Every floating point value goes through [`normalize`] before it is
//! serialized, so the files only ever contain finite numbers or `null`.

use std::fs::{self, OpenOptions};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use evpark_common::config::ClassifierConfig;
use evpark_common::{EvidenceLayout, EvidenceName, EvidenceStore, PowertrainTag, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info};

use crate::classify::ClassificationResult;
use crate::debounce::ConfirmedDetection;
use crate::recognition::{PlateArea, PlateCandidate};

const JPEG_QUALITY: u8 = 90;

/// Finite `f64` or `None` (serialized as `null`)
pub fn normalize<T: Into<f64>>(value: T) -> Option<f64> {
    let value = value.into();
    value.is_finite().then_some(value)
}

#[derive(Debug, Clone, Serialize)]
pub struct AreaRecord {
    pub angle: Option<f64>,
    pub height: Option<f64>,
    pub width: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

impl From<&PlateArea> for AreaRecord {
    fn from(area: &PlateArea) -> Self {
        Self {
            angle: normalize(area.angle),
            height: normalize(area.height),
            width: normalize(area.width),
            x: normalize(area.x),
            y: normalize(area.y),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvAttrs {
    pub ev: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceRecord {
    pub ocr: Option<f64>,
    pub plate: Option<f64>,
    pub ev: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsRecord {
    pub elapsed_time: Option<f64>,
    pub confidence_score: Option<f64>,
    pub model_used: String,
    pub error_occurred: bool,
    pub error_message: Option<String>,
    pub confidence_approximated: bool,
}

/// Recognizer output merged with the ensemble decision
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRecord {
    pub area: Option<AreaRecord>,
    pub attrs: EvAttrs,
    pub conf: ConfidenceRecord,
    pub elapsed: Option<f64>,
    pub ev: bool,
    pub text: String,
    pub timestamp: String,
    pub metrics: MetricsRecord,
}

impl DetectionRecord {
    pub fn new(candidate: &PlateCandidate, result: &ClassificationResult) -> Self {
        let elapsed = normalize(result.elapsed.as_secs_f64());
        Self {
            area: candidate.area.as_ref().map(AreaRecord::from),
            attrs: EvAttrs { ev: result.is_ev },
            conf: ConfidenceRecord {
                ocr: normalize(candidate.confidence.ocr),
                plate: normalize(candidate.confidence.plate),
                ev: normalize(result.confidence),
            },
            elapsed,
            ev: result.is_ev,
            text: result.plate_text.clone(),
            timestamp: result.timestamp.to_rfc3339(),
            metrics: MetricsRecord {
                elapsed_time: elapsed,
                confidence_score: normalize(result.confidence),
                model_used: result.model_used.clone(),
                error_occurred: result.error_occurred,
                error_message: None,
                confidence_approximated: result.confidence_approximated,
            },
        }
    }
}

#[derive(Serialize)]
struct UncertainCase<'a> {
    timestamp: String,
    input_plate_info: &'a PlateCandidate,
    detection_result: &'a DetectionRecord,
    image_path: Option<String>,
    metrics: &'a MetricsRecord,
}

#[derive(Serialize)]
struct ErrorCase<'a> {
    timestamp: String,
    plate_info: &'a PlateCandidate,
    error_message: &'a str,
    image_path: Option<String>,
}

#[derive(Serialize)]
struct PredictionLogEntry<'a> {
    timestamp: String,
    plate_number: &'a str,
    ts_ev_prediction: bool,
    my_model_ev_prediction: bool,
    my_model_confidence: Option<f64>,
    model_used: &'a str,
    processing_time: Option<f64>,
    saved_in_uncertain: bool,
}

#[derive(Serialize)]
struct PendingSidecar<'a> {
    camera: &'a str,
    captured_at: String,
    powertrain: PowertrainTag,
    recognition: &'a [PlateCandidate],
    detection_result: DetectionRecord,
}

/// Writes diagnostic cases and the comprehensive prediction log
#[derive(Debug)]
pub struct CaseRecorder {
    uncertain_dir: PathBuf,
    error_dir: PathBuf,
    log_dir: PathBuf,
    save_uncertain_image: bool,
    save_error_image: bool,
    saved_image_size: Option<[u32; 2]>,
    log_lock: Mutex<()>,
}

impl CaseRecorder {
    pub fn new(layout: &EvidenceLayout, config: &ClassifierConfig) -> Self {
        Self {
            uncertain_dir: layout.uncertain.clone(),
            error_dir: layout.errors.clone(),
            log_dir: layout.predictions_log.clone(),
            save_uncertain_image: config.save_uncertain_image,
            save_error_image: config.save_error_image,
            saved_image_size: config.saved_image_size,
            log_lock: Mutex::new(()),
        }
    }

    /// Low-confidence classification: result, input geometry, optional image
    pub fn record_uncertain(
        &self,
        frame: &RgbImage,
        candidate: &PlateCandidate,
        record: &DetectionRecord,
    ) -> Result<PathBuf> {
        let now = Local::now();
        let (dir, stem) = case_location(&self.uncertain_dir, now)?;

        let image_path = if self.save_uncertain_image {
            Some(self.write_case_image(frame, &dir, &stem)?)
        } else {
            None
        };

        let case = UncertainCase {
            timestamp: now.to_rfc3339(),
            input_plate_info: candidate,
            detection_result: record,
            image_path: image_path.map(|p| p.display().to_string()),
            metrics: &record.metrics,
        };
        let json_path = dir.join(format!("{stem}.json"));
        fs::write(&json_path, to_pretty_json(&case)?)?;

        info!(path = %json_path.display(), "Saved uncertain case");
        Ok(json_path)
    }

    /// Classification that failed validation or exhausted its retries
    pub fn record_error(&self, frame: &RgbImage, candidate: &PlateCandidate, message: &str) -> Result<PathBuf> {
        let now = Local::now();
        let (dir, stem) = case_location(&self.error_dir, now)?;

        let image_path = if self.save_error_image && frame.width() > 0 && frame.height() > 0 {
            Some(self.write_case_image(frame, &dir, &stem)?)
        } else {
            None
        };

        let case = ErrorCase {
            timestamp: now.to_rfc3339(),
            plate_info: candidate,
            error_message: message,
            image_path: image_path.map(|p| p.display().to_string()),
        };
        let json_path = dir.join(format!("{stem}.json"));
        fs::write(&json_path, to_pretty_json(&case)?)?;

        info!(path = %json_path.display(), "Saved error case");
        Ok(json_path)
    }

    /// Append one successful classification to today's `predictions.jsonl`
    pub fn append_prediction(
        &self,
        candidate: &PlateCandidate,
        record: &DetectionRecord,
        saved_in_uncertain: bool,
    ) -> Result<PathBuf> {
        let now = Local::now();
        let entry = PredictionLogEntry {
            timestamp: now.to_rfc3339(),
            plate_number: &candidate.text,
            ts_ev_prediction: candidate.ev_hint(),
            my_model_ev_prediction: record.ev,
            my_model_confidence: record.conf.ev,
            model_used: &record.metrics.model_used,
            processing_time: record.elapsed,
            saved_in_uncertain,
        };
        let mut line = serde_json::to_vec(&entry)
            .map_err(|e| evpark_common::Error::Internal(format!("serialize log entry: {e}")))?;
        line.push(b'\n');

        let dir = self.log_dir.join(now.format("%Y%m%d").to_string());
        fs::create_dir_all(&dir)?;
        let path = dir.join("predictions.jsonl");

        // one writer at a time keeps lines from interleaving across streams
        let _guard = self.log_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;

        Ok(path)
    }

    fn write_case_image(&self, frame: &RgbImage, dir: &Path, stem: &str) -> Result<PathBuf> {
        let path = dir.join(format!("{stem}.jpg"));
        let bytes = match self.saved_image_size {
            Some([w, h]) if w > 0 && h > 0 => {
                encode_jpeg(&imageops::resize(frame, w, h, FilterType::Triangle))?
            }
            _ => encode_jpeg(frame)?,
        };
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// `<base>/<yyyyMMdd>/` plus a `HHMMSS_ffffff` stem
fn case_location(base: &Path, now: DateTime<Local>) -> Result<(PathBuf, String)> {
    let dir = base.join(now.format("%Y%m%d").to_string());
    fs::create_dir_all(&dir)?;
    Ok((dir, now.format("%H%M%S_%6f").to_string()))
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| evpark_common::Error::Internal(format!("serialize case: {e}")))
}

pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode_image(frame)
        .map_err(|e| evpark_common::Error::Internal(format!("JPEG encode failed: {e}")))?;
    Ok(buffer.into_inner())
}

/// Write a classified detection into the pending zone
///
/// The filename tag is the ensemble's decision.
pub fn write_pending_case(
    store: &EvidenceStore,
    camera: &str,
    detection: &ConfirmedDetection,
    result: &ClassificationResult,
) -> Result<PathBuf> {
    let observation = &detection.observation;
    let tag = PowertrainTag::from_is_ev(result.is_ev);
    let name = EvidenceName::new(detection.plate.clone(), tag, observation.captured_at.naive_local());

    let sidecar = PendingSidecar {
        camera,
        captured_at: observation.captured_at.to_rfc3339(),
        powertrain: tag,
        recognition: &observation.raw_output,
        detection_result: DetectionRecord::new(&observation.candidate, result),
    };
    let sidecar = to_pretty_json(&sidecar)?;
    let image = encode_jpeg(&observation.source_frame)?;

    let path = store.save_pending(&name, &image, &sidecar)?;
    debug!(camera, plate = %detection.plate, tag = %tag, "Pending evidence written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_drops_non_finite() {
        assert_eq!(normalize(0.5f32), Some(0.5));
        assert_eq!(normalize(f32::NAN), None);
        assert_eq!(normalize(f64::INFINITY), None);
    }

    #[test]
    fn test_area_record_serializes_nan_as_null() {
        let area = PlateArea {
            x: 1.0,
            y: 2.0,
            width: 3.0,
            height: 4.0,
            angle: f64::NAN,
        };
        let json = serde_json::to_value(AreaRecord::from(&area)).unwrap();
        assert!(json["angle"].is_null());
        assert_eq!(json["width"], 3.0);
    }
}
