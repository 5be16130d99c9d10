//! Ensemble selection, retry, and diagnostic output

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evpark_anpr::classify::{EnsembleClassifier, PowertrainScorer};
use evpark_anpr::evidence::CaseRecorder;
use evpark_anpr::recognition::{PlateArea, PlateAttributes, PlateCandidate, RecognitionConfidence};
use evpark_anpr::ModelError;
use evpark_common::config::ClassifierConfig;
use evpark_common::EvidenceLayout;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

/// Scorer with a fixed answer that can fail its first calls or run slowly
struct FakeScorer {
    name: &'static str,
    label: bool,
    probability: Option<f32>,
    failures_left: AtomicUsize,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeScorer {
    fn new(name: &'static str, label: bool, probability: Option<f32>) -> Self {
        Self {
            name,
            label,
            probability,
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PowertrainScorer for FakeScorer {
    fn name(&self) -> &str {
        self.name
    }

    fn predict(&self, _features: &[f32]) -> Result<bool, ModelError> {
        Ok(self.label)
    }

    fn probability(&self, features: &[f32]) -> Result<Option<f32>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(features.len(), 768);
        std::thread::sleep(self.delay);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ModelError::Invalid("transient scorer failure".to_string()));
        }
        Ok(self.probability)
    }
}

fn candidate() -> PlateCandidate {
    PlateCandidate {
        text: "12가3456".to_string(),
        confidence: RecognitionConfidence { ocr: 0.93, plate: 0.91 },
        area: Some(PlateArea {
            x: 8.0,
            y: 8.0,
            width: 32.0,
            height: 16.0,
            angle: 4.5,
        }),
        attrs: PlateAttributes { ev: Some(false) },
        ev: None,
    }
}

fn frame() -> RgbImage {
    RgbImage::from_pixel(64, 64, Rgb([30, 160, 90]))
}

fn config() -> ClassifierConfig {
    ClassifierConfig {
        retry_count: 2,
        retry_delay_ms: 1,
        max_processing_time_ms: 5_000,
        ..ClassifierConfig::default()
    }
}

fn build(
    dir: &TempDir,
    config: ClassifierConfig,
    primary: Arc<FakeScorer>,
    fallback: Arc<FakeScorer>,
) -> (EnsembleClassifier, EvidenceLayout) {
    let layout = EvidenceLayout::under(dir.path());
    let recorder = Arc::new(CaseRecorder::new(&layout, &config));
    (EnsembleClassifier::new(primary, fallback, config, recorder), layout)
}

/// Files with the given extension anywhere below `dir`
fn files_with_ext(dir: &Path, ext: &str) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(files_with_ext(&path, ext));
            } else if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                found.push(path);
            }
        }
    }
    found
}

fn prediction_lines(layout: &EvidenceLayout) -> Vec<serde_json::Value> {
    files_with_ext(&layout.predictions_log, "jsonl")
        .iter()
        .flat_map(|p| {
            fs::read_to_string(p)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect::<Vec<serde_json::Value>>()
        })
        .collect()
}

#[test]
fn test_confident_primary_decides_alone() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(FakeScorer::new("xgb", true, Some(0.9)));
    let fallback = Arc::new(FakeScorer::new("lgbm", false, Some(0.8)));
    let (classifier, layout) = build(&dir, config(), primary.clone(), fallback.clone());

    let result = classifier.classify(&frame(), &candidate()).unwrap();

    assert!(result.is_ev);
    assert_eq!(result.model_used, "xgb");
    assert!((result.confidence - 0.9).abs() < 1e-6);
    assert!(!result.confidence_approximated);
    assert_eq!(fallback.calls(), 0);

    let lines = prediction_lines(&layout);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["plate_number"], "12가3456");
    assert_eq!(lines[0]["ts_ev_prediction"], false);
    assert_eq!(lines[0]["my_model_ev_prediction"], true);
    assert_eq!(lines[0]["model_used"], "xgb");
    assert_eq!(lines[0]["saved_in_uncertain"], false);
    assert!(files_with_ext(&layout.uncertain, "json").is_empty());
}

#[test]
fn test_low_primary_probability_uses_fallback() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(FakeScorer::new("xgb", true, Some(0.30)));
    let fallback = Arc::new(FakeScorer::new("lgbm", false, Some(0.85)));
    let (classifier, _layout) = build(&dir, config(), primary, fallback);

    let result = classifier.classify(&frame(), &candidate()).unwrap();

    assert!(!result.is_ev);
    assert_eq!(result.model_used, "lgbm");
    assert!((result.confidence - 0.85).abs() < 1e-6);
    assert!((result.primary_probability - 0.30).abs() < 1e-6);
    assert!(!result.confidence_approximated);
}

#[test]
fn test_label_only_fallback_reports_primary_probability_flagged() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(FakeScorer::new("xgb", false, Some(0.20)));
    let fallback = Arc::new(FakeScorer::new("lgbm", true, None));
    let (classifier, layout) = build(&dir, config(), primary, fallback);

    let result = classifier.classify(&frame(), &candidate()).unwrap();

    assert!(result.is_ev);
    assert_eq!(result.model_used, "lgbm");
    assert!(result.confidence_approximated);
    assert!((result.confidence - 0.20).abs() < 1e-6);

    // below the threshold, so an uncertain case is written and flagged in the log
    let cases = files_with_ext(&layout.uncertain, "json");
    assert_eq!(cases.len(), 1);
    assert_eq!(files_with_ext(&layout.uncertain, "jpg").len(), 1);
    let case: serde_json::Value = serde_json::from_str(&fs::read_to_string(&cases[0]).unwrap()).unwrap();
    assert_eq!(case["detection_result"]["text"], "12가3456");
    assert_eq!(case["detection_result"]["metrics"]["confidence_approximated"], true);
    assert_eq!(case["input_plate_info"]["conf"]["ocr"], 0.93);
    assert_eq!(prediction_lines(&layout)[0]["saved_in_uncertain"], true);
}

#[test]
fn test_transient_failures_are_retried() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(FakeScorer::new("xgb", true, Some(0.9)).failing(2));
    let fallback = Arc::new(FakeScorer::new("lgbm", false, Some(0.8)));
    let (classifier, layout) = build(&dir, config(), primary.clone(), fallback);

    let result = classifier.classify(&frame(), &candidate());

    assert!(result.is_some());
    assert_eq!(primary.calls(), 3);
    assert!(files_with_ext(&layout.errors, "json").is_empty());

    let summary = classifier.metrics_summary();
    assert_eq!(summary.total_processed, 3);
    assert!((summary.error_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(summary.model_usage.get("xgb"), Some(&1));
}

#[test]
fn test_exhausted_retries_write_error_case() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(FakeScorer::new("xgb", true, Some(0.9)).failing(10));
    let fallback = Arc::new(FakeScorer::new("lgbm", false, Some(0.8)));
    let (classifier, layout) = build(&dir, config(), primary.clone(), fallback);

    assert!(classifier.classify(&frame(), &candidate()).is_none());
    assert_eq!(primary.calls(), 3);

    let errors = files_with_ext(&layout.errors, "json");
    assert_eq!(errors.len(), 1);
    let case: serde_json::Value = serde_json::from_str(&fs::read_to_string(&errors[0]).unwrap()).unwrap();
    assert!(case["error_message"].as_str().unwrap().contains("3/3"));
    assert!(prediction_lines(&layout).is_empty());
}

#[test]
fn test_processing_time_breach_counts_as_failure() {
    let dir = TempDir::new().unwrap();
    let config = ClassifierConfig {
        retry_count: 1,
        retry_delay_ms: 1,
        max_processing_time_ms: 1,
        ..ClassifierConfig::default()
    };
    let primary = Arc::new(FakeScorer::new("xgb", true, Some(0.9)).slow(Duration::from_millis(20)));
    let fallback = Arc::new(FakeScorer::new("lgbm", false, Some(0.8)));
    let (classifier, layout) = build(&dir, config, primary.clone(), fallback);

    assert!(classifier.classify(&frame(), &candidate()).is_none());
    assert_eq!(primary.calls(), 2);
    assert_eq!(files_with_ext(&layout.errors, "json").len(), 1);
}

#[test]
fn test_invalid_input_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(FakeScorer::new("xgb", true, Some(0.9)));
    let fallback = Arc::new(FakeScorer::new("lgbm", false, Some(0.8)));
    let (classifier, layout) = build(&dir, config(), primary.clone(), fallback);

    let mut bad = candidate();
    bad.area = Some(PlateArea {
        width: 0.0,
        ..bad.area.unwrap()
    });

    assert!(classifier.classify(&frame(), &bad).is_none());
    assert_eq!(primary.calls(), 0);
    assert_eq!(files_with_ext(&layout.errors, "json").len(), 1);

    let mut no_area = candidate();
    no_area.area = None;
    assert!(classifier.classify(&frame(), &no_area).is_none());
    assert!(classifier.classify(&RgbImage::new(0, 0), &candidate()).is_none());
    assert_eq!(primary.calls(), 0);
}

#[test]
fn test_required_resolution_is_opt_in() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(FakeScorer::new("xgb", true, Some(0.9)));
    let fallback = Arc::new(FakeScorer::new("lgbm", false, Some(0.8)));

    let (lenient, _) = build(&dir, config(), primary.clone(), fallback.clone());
    assert!(lenient.validate_input(&frame(), &candidate()).is_ok());

    let strict_config = ClassifierConfig {
        required_resolution: Some([1920, 1080]),
        ..config()
    };
    let (strict, _) = build(&dir, strict_config, primary, fallback);
    assert!(strict.validate_input(&frame(), &candidate()).is_err());
}
