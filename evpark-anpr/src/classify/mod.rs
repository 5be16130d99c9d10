//! Powertrain classification ensemble
//!
//! A primary scorer decides on its own when its EV probability clears the
//! confidence threshold; otherwise the fallback scorer's label (and, when it
//! can report one, its probability) is used. Each attempt is bounded by a
//! wall-clock budget checked after the fact. Failed attempts are retried with
//! a fixed delay; input that fails validation is rejected without retry.
//!
//! Side effects per call:
//! - validation failure or exhausted retries: an error case
//! - success below the threshold: an uncertain case
//! - every success: one line in the comprehensive prediction log

pub mod features;
pub mod model;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use evpark_common::config::ClassifierConfig;
use image::RgbImage;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{ClassifyError, ModelError};
use crate::evidence::{CaseRecorder, DetectionRecord};
use crate::recognition::PlateCandidate;

pub use features::FEATURE_LEN;
pub use model::{PowertrainScorer, TreeEnsembleModel};

/// Outcome of one successful classification
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub plate_text: String,
    pub is_ev: bool,
    pub confidence: f32,
    pub model_used: String,
    pub elapsed: Duration,
    pub error_occurred: bool,
    /// Fallback decided but could not report a probability; `confidence`
    /// is the primary's probability
    pub confidence_approximated: bool,
    pub primary_probability: f32,
    pub timestamp: DateTime<Local>,
}

/// Running statistics over every attempt
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    pub total_processed: usize,
    pub avg_processing_time_ms: f64,
    pub avg_confidence: f64,
    pub error_rate: f64,
    pub model_usage: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct MetricsHistory {
    attempts: usize,
    errors: usize,
    total_time: Duration,
    total_confidence: f64,
    model_usage: BTreeMap<String, usize>,
}

impl MetricsHistory {
    fn record_success(&mut self, result: &ClassificationResult) {
        self.attempts += 1;
        self.total_time += result.elapsed;
        if result.confidence.is_finite() {
            self.total_confidence += f64::from(result.confidence);
        }
        *self.model_usage.entry(result.model_used.clone()).or_default() += 1;
    }

    fn record_failure(&mut self, elapsed: Duration) {
        self.attempts += 1;
        self.errors += 1;
        self.total_time += elapsed;
    }

    fn summary(&self) -> MetricsSummary {
        if self.attempts == 0 {
            return MetricsSummary::default();
        }
        let n = self.attempts as f64;
        MetricsSummary {
            total_processed: self.attempts,
            avg_processing_time_ms: self.total_time.as_secs_f64() * 1000.0 / n,
            avg_confidence: self.total_confidence / n,
            error_rate: self.errors as f64 / n,
            model_usage: self.model_usage.clone(),
        }
    }
}

/// Primary / fallback scorer pair with retry and diagnostics
pub struct EnsembleClassifier {
    primary: Arc<dyn PowertrainScorer>,
    fallback: Arc<dyn PowertrainScorer>,
    config: ClassifierConfig,
    recorder: Arc<CaseRecorder>,
    metrics: Mutex<MetricsHistory>,
}

impl EnsembleClassifier {
    pub fn new(
        primary: Arc<dyn PowertrainScorer>,
        fallback: Arc<dyn PowertrainScorer>,
        config: ClassifierConfig,
        recorder: Arc<CaseRecorder>,
    ) -> Self {
        Self {
            primary,
            fallback,
            config,
            recorder,
            metrics: Mutex::new(MetricsHistory::default()),
        }
    }

    /// Classify one confirmed plate; `None` when no trustworthy result exists
    ///
    /// Blocking: sleeps between retries. Run it on a blocking thread.
    pub fn classify(&self, frame: &RgbImage, candidate: &PlateCandidate) -> Option<ClassificationResult> {
        if let Err(e) = self.validate_input(frame, candidate) {
            warn!(plate = %candidate.text, error = %e, "Rejected classification input");
            self.save_error_case(frame, candidate, &e.to_string());
            return None;
        }

        let attempts = self.config.retry_count + 1;
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);

        for attempt in 1..=attempts {
            let started = Instant::now();
            match self.attempt(frame, candidate, started) {
                Ok(result) => {
                    self.lock_metrics().record_success(&result);
                    self.finish(frame, candidate, &result);
                    return Some(result);
                }
                Err(e) => {
                    self.lock_metrics().record_failure(started.elapsed());
                    error!(
                        plate = %candidate.text,
                        attempt,
                        attempts,
                        error = %e,
                        "Classification attempt failed"
                    );

                    if attempt < attempts && e.is_retryable() {
                        std::thread::sleep(retry_delay);
                        continue;
                    }

                    let message = format!("classification failed (attempt {attempt}/{attempts}): {e}");
                    self.save_error_case(frame, candidate, &message);
                    return None;
                }
            }
        }

        None
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.lock_metrics().summary()
    }

    /// Single validation step run before any attempt
    pub fn validate_input(&self, frame: &RgbImage, candidate: &PlateCandidate) -> Result<(), ClassifyError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(ClassifyError::InvalidInput("empty frame".to_string()));
        }

        if let Some([w, h]) = self.config.required_resolution {
            if frame.dimensions() != (w, h) {
                return Err(ClassifyError::InvalidInput(format!(
                    "frame is {}x{}, required {}x{}",
                    frame.width(),
                    frame.height(),
                    w,
                    h
                )));
            }
        }

        if candidate.text.trim().is_empty() {
            return Err(ClassifyError::InvalidInput("plate text is empty".to_string()));
        }

        let area = candidate
            .area
            .ok_or_else(|| ClassifyError::InvalidInput("plate area is missing".to_string()))?;
        let all_finite = [area.x, area.y, area.width, area.height, area.angle]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(ClassifyError::InvalidInput(format!("non-finite plate area {area:?}")));
        }
        if area.width <= 0.0 || area.height <= 0.0 {
            return Err(ClassifyError::InvalidInput(format!(
                "plate area width/height must be positive, got {}x{}",
                area.width, area.height
            )));
        }

        Ok(())
    }

    fn attempt(
        &self,
        frame: &RgbImage,
        candidate: &PlateCandidate,
        started: Instant,
    ) -> Result<ClassificationResult, ClassifyError> {
        let area = candidate
            .area
            .ok_or_else(|| ClassifyError::InvalidInput("plate area is missing".to_string()))?;
        let [tw, th] = self.config.target_size;

        let hsv = features::preprocess(frame, &area, (tw, th))?;
        let features = features::extract_features(&hsv);
        let decision = self.score(&features)?;

        let elapsed = started.elapsed();
        let limit = Duration::from_millis(self.config.max_processing_time_ms);
        if elapsed > limit {
            return Err(ClassifyError::Timeout {
                elapsed_ms: elapsed.as_millis(),
                limit_ms: limit.as_millis(),
            });
        }

        Ok(ClassificationResult {
            plate_text: candidate.text.trim().to_string(),
            is_ev: decision.is_ev,
            confidence: decision.confidence,
            model_used: decision.model_used,
            elapsed,
            error_occurred: false,
            confidence_approximated: decision.approximated,
            primary_probability: decision.primary_probability,
            timestamp: Local::now(),
        })
    }

    fn score(&self, features: &[f32]) -> Result<Decision, ModelError> {
        let primary_probability = self.primary.probability(features)?.ok_or_else(|| {
            ModelError::Invalid(format!("primary scorer {} reports no probability", self.primary.name()))
        })?;

        if primary_probability >= self.config.confidence_threshold {
            return Ok(Decision {
                is_ev: self.primary.predict(features)?,
                confidence: primary_probability,
                model_used: self.primary.name().to_string(),
                approximated: false,
                primary_probability,
            });
        }

        let is_ev = self.fallback.predict(features)?;
        let (confidence, approximated) = match self.fallback.probability(features)? {
            Some(p) => (p, false),
            None => {
                warn!(
                    fallback = self.fallback.name(),
                    "Fallback scorer has no probability, reporting the primary's"
                );
                (primary_probability, true)
            }
        };

        Ok(Decision {
            is_ev,
            confidence,
            model_used: self.fallback.name().to_string(),
            approximated,
            primary_probability,
        })
    }

    fn finish(&self, frame: &RgbImage, candidate: &PlateCandidate, result: &ClassificationResult) {
        let record = DetectionRecord::new(candidate, result);
        let uncertain =
            result.confidence.is_nan() || result.confidence < self.config.confidence_threshold;

        if uncertain {
            if let Err(e) = self.recorder.record_uncertain(frame, candidate, &record) {
                error!(plate = %result.plate_text, error = %e, "Failed to save uncertain case");
            }
        }
        if let Err(e) = self.recorder.append_prediction(candidate, &record, uncertain) {
            error!(plate = %result.plate_text, error = %e, "Failed to append prediction log");
        }

        let summary = self.metrics_summary();
        info!(
            plate = %result.plate_text,
            ev = result.is_ev,
            confidence = result.confidence,
            model = %result.model_used,
            elapsed_ms = result.elapsed.as_millis() as u64,
            total_processed = summary.total_processed,
            avg_processing_time_ms = summary.avg_processing_time_ms,
            avg_confidence = summary.avg_confidence,
            error_rate = summary.error_rate,
            model_usage = ?summary.model_usage,
            "Classification complete"
        );
    }

    fn save_error_case(&self, frame: &RgbImage, candidate: &PlateCandidate, message: &str) {
        if let Err(e) = self.recorder.record_error(frame, candidate, message) {
            error!(plate = %candidate.text, error = %e, "Failed to save error case");
        }
    }

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, MetricsHistory> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Decision {
    is_ev: bool,
    confidence: f32,
    model_used: String,
    approximated: bool,
    primary_probability: f32,
}
