//! Camera worker, debounce, and classification stage behaviour

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evpark_anpr::camera::{spawn_camera, CameraWorker, FrameSource, SourceFactory, StreamContext};
use evpark_anpr::classify::{EnsembleClassifier, PowertrainScorer};
use evpark_anpr::evidence::CaseRecorder;
use evpark_anpr::pipeline::run_classification_stage;
use evpark_anpr::recognition::{
    PixelFormat, PlateArea, PlateAttributes, PlateCandidate, PlateRecognizer, RecognitionConfidence,
};
use evpark_anpr::{CaptureError, ModelError, RecognitionError};
use evpark_common::config::{AnprConfig, CameraConfig, ClassifierConfig};
use evpark_common::{EvidenceLayout, EvidenceStore, PowertrainTag};
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn candidate(text: &str) -> PlateCandidate {
    PlateCandidate {
        text: text.to_string(),
        confidence: RecognitionConfidence { ocr: 0.9, plate: 0.9 },
        area: Some(PlateArea {
            x: 4.0,
            y: 4.0,
            width: 24.0,
            height: 12.0,
            angle: 0.0,
        }),
        attrs: PlateAttributes { ev: Some(true) },
        ev: None,
    }
}

/// Replays one scripted answer per call; empty answers once the script ends
struct ScriptedRecognizer {
    script: Mutex<VecDeque<Vec<PlateCandidate>>>,
    panics_left: AtomicUsize,
}

impl ScriptedRecognizer {
    fn new<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = Option<&'static str>>,
    {
        let script = frames
            .into_iter()
            .map(|text| text.map(|t| vec![candidate(t)]).unwrap_or_default())
            .collect();
        Self {
            script: Mutex::new(script),
            panics_left: AtomicUsize::new(0),
        }
    }

    fn repeating(text: &'static str) -> Self {
        Self::new(std::iter::repeat(Some(text)).take(10_000))
    }

    fn panicking_first(self, times: usize) -> Self {
        self.panics_left.store(times, Ordering::SeqCst);
        self
    }
}

impl PlateRecognizer for ScriptedRecognizer {
    fn initialize(&self) -> Result<(), RecognitionError> {
        Ok(())
    }

    fn recognize(
        &self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        _format: PixelFormat,
        _options: &str,
    ) -> Result<Vec<PlateCandidate>, RecognitionError> {
        let panicked = self
            .panics_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if panicked {
            panic!("recognizer crashed");
        }
        Ok(self.script.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Endless source of small solid frames
struct StillFrames;

impl FrameSource for StillFrames {
    fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
        std::thread::sleep(Duration::from_millis(2));
        Ok(RgbImage::from_pixel(48, 32, Rgb([10, 20, 30])))
    }
}

fn still_factory() -> SourceFactory {
    Arc::new(|| Ok(Box::new(StillFrames) as Box<dyn FrameSource>))
}

fn context(recognizer: ScriptedRecognizer, window: usize, threshold: usize) -> Arc<StreamContext> {
    Arc::new(StreamContext {
        camera: CameraConfig {
            name: "gate-1".to_string(),
            snapshot_url: "http://127.0.0.1:1/snapshot.jpg".to_string(),
            frame_interval_ms: 1,
            roi: None,
        },
        anpr: AnprConfig {
            plate_window_size: window,
            plate_count_threshold: threshold,
            reconnect_delay_secs: 0,
            ..AnprConfig::default()
        },
        recognizer: Arc::new(recognizer),
        source_factory: still_factory(),
    })
}

fn frame() -> RgbImage {
    RgbImage::from_pixel(48, 32, Rgb([10, 20, 30]))
}

#[test]
fn test_plate_seen_five_times_in_ten_frames_confirms_once() {
    // plate visible at frames 3..=7 only
    let script = (1..=10).map(|i| (3..=7).contains(&i).then_some("12가3456"));
    let (tx, mut rx) = mpsc::channel(8);
    let mut worker = CameraWorker::new(context(ScriptedRecognizer::new(script), 10, 5), tx).unwrap();

    let mut confirmed_at = Vec::new();
    for i in 1..=10 {
        assert_eq!(worker.process_frame(frame()), ControlFlow::Continue(()));
        while let Ok(detection) = rx.try_recv() {
            assert_eq!(detection.plate.as_str(), "12가3456");
            confirmed_at.push(i);
        }
    }

    assert_eq!(confirmed_at, vec![7]);
}

#[test]
fn test_noise_and_malformed_text_never_confirm() {
    let script = [
        Some("12가3456"),
        Some("ABC"),
        Some("12가3456"),
        Some("  "),
        None,
        Some("34나5678"),
        Some("12가3456"),
    ];
    let (tx, mut rx) = mpsc::channel(8);
    let mut worker = CameraWorker::new(context(ScriptedRecognizer::new(script), 10, 4), tx).unwrap();

    for _ in 0..7 {
        let _ = worker.process_frame(frame());
    }

    assert!(rx.try_recv().is_err());
}

#[test]
fn test_full_queue_drops_detection_and_keeps_running() {
    let script = [Some("12가3456"), Some("34나5678"), Some("56다7890")];
    let (tx, mut rx) = mpsc::channel(1);
    let mut worker = CameraWorker::new(context(ScriptedRecognizer::new(script), 3, 1), tx).unwrap();

    for _ in 0..3 {
        assert_eq!(worker.process_frame(frame()), ControlFlow::Continue(()));
    }

    let first = rx.try_recv().unwrap();
    assert_eq!(first.plate.as_str(), "12가3456");
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_closed_queue_stops_worker() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let mut worker =
        CameraWorker::new(context(ScriptedRecognizer::new([Some("12가3456")]), 1, 1), tx).unwrap();

    assert_eq!(worker.process_frame(frame()), ControlFlow::Break(()));
}

#[test]
fn test_invalid_debounce_settings_are_rejected() {
    let (tx, _rx) = mpsc::channel(1);
    assert!(CameraWorker::new(context(ScriptedRecognizer::new(Vec::new()), 3, 5), tx).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_worker_is_restarted() {
    let recognizer = ScriptedRecognizer::repeating("12가3456").panicking_first(1);
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let handle = spawn_camera(context(recognizer, 2, 2), tx, cancel.clone()).unwrap();

    let detection = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no detection after restart")
        .expect("channel closed");
    assert_eq!(detection.plate.as_str(), "12가3456");

    cancel.cancel();
    tokio::task::spawn_blocking(move || handle.join()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_reopens_source_after_open_failure() {
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&opens);
    let factory: SourceFactory = Arc::new(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(CaptureError::Disconnected("camera offline".to_string()))
        } else {
            Ok(Box::new(StillFrames) as Box<dyn FrameSource>)
        }
    });

    let ctx = context(ScriptedRecognizer::repeating("12가3456"), 1, 1);
    let ctx = Arc::new(StreamContext {
        camera: ctx.camera.clone(),
        anpr: ctx.anpr.clone(),
        recognizer: Arc::clone(&ctx.recognizer),
        source_factory: factory,
    });
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let handle = spawn_camera(ctx, tx, cancel.clone()).unwrap();

    let detection = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await.unwrap();
    assert!(detection.is_some());
    assert!(opens.load(Ordering::SeqCst) >= 2);

    cancel.cancel();
    tokio::task::spawn_blocking(move || handle.join()).await.unwrap();
}

struct FixedScorer(Option<f32>);

impl PowertrainScorer for FixedScorer {
    fn name(&self) -> &str {
        "fixed"
    }

    fn predict(&self, _features: &[f32]) -> Result<bool, ModelError> {
        Ok(false)
    }

    fn probability(&self, _features: &[f32]) -> Result<Option<f32>, ModelError> {
        Ok(self.0)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stage_writes_pending_case_per_detection() {
    let dir = TempDir::new().unwrap();
    let layout = EvidenceLayout::under(dir.path());
    layout.create_dirs().unwrap();
    let config = ClassifierConfig::default();
    let recorder = Arc::new(CaseRecorder::new(&layout, &config));
    let classifier = Arc::new(EnsembleClassifier::new(
        Arc::new(FixedScorer(Some(0.95))),
        Arc::new(FixedScorer(None)),
        config,
        recorder,
    ));
    let store = Arc::new(EvidenceStore::new(layout.clone(), 100));

    // the recognizer hints EV, the classifier says ICE; the classifier wins
    let script = [Some("12가3456"), Some("34나5678")];
    let (tx, rx) = mpsc::channel(8);
    let mut worker = CameraWorker::new(context(ScriptedRecognizer::new(script), 2, 1), tx).unwrap();
    for _ in 0..2 {
        let _ = worker.process_frame(frame());
    }
    drop(worker);

    run_classification_stage("gate-1".to_string(), rx, classifier, Arc::clone(&store), 2).await;

    let pending = store.list_pending().unwrap();
    assert_eq!(pending.len(), 2);
    let mut plates: Vec<_> = pending.iter().map(|c| c.name.plate.to_string()).collect();
    plates.sort();
    assert_eq!(plates, vec!["12가3456", "34나5678"]);

    for case in &pending {
        assert_eq!(case.name.tag, PowertrainTag::Ice);
        assert!(case.image_path.exists());
        let sidecar: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(case.sidecar_path()).unwrap()).unwrap();
        assert_eq!(sidecar["camera"], "gate-1");
        assert_eq!(sidecar["recognition"][0]["text"], case.name.plate.to_string());
        assert_eq!(sidecar["detection_result"]["metrics"]["model_used"], "fixed");
    }
}

fn files_with_ext(dir: &std::path::Path, ext: &str) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
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

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_classification_drops_detection() {
    let dir = TempDir::new().unwrap();
    let layout = EvidenceLayout::under(dir.path());
    layout.create_dirs().unwrap();
    let config = ClassifierConfig {
        retry_count: 0,
        ..ClassifierConfig::default()
    };
    let recorder = Arc::new(CaseRecorder::new(&layout, &config));
    // a primary without probability is an invalid model, so every attempt fails
    let classifier = Arc::new(EnsembleClassifier::new(
        Arc::new(FixedScorer(None)),
        Arc::new(FixedScorer(None)),
        config,
        recorder,
    ));
    let store = Arc::new(EvidenceStore::new(layout.clone(), 100));

    let (tx, rx) = mpsc::channel(8);
    let mut worker =
        CameraWorker::new(context(ScriptedRecognizer::new([Some("12가3456")]), 1, 1), tx).unwrap();
    let _ = worker.process_frame(frame());
    drop(worker);

    run_classification_stage("gate-1".to_string(), rx, classifier, Arc::clone(&store), 1).await;

    assert!(store.list_pending().unwrap().is_empty());
    let error_cases = files_with_ext(&layout.errors, "json");
    assert_eq!(error_cases.len(), 1);
    let case: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&error_cases[0]).unwrap()).unwrap();
    assert_eq!(case["plate_info"]["text"], "12가3456");
}
