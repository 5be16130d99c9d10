//! Wiring from camera threads to pending evidence
//!
//! Each camera gets a bounded detection queue and an async classification
//! stage. Classification runs on the blocking pool (it sleeps between
//! retries); evidence writes run as blocking tasks limited by a per-stream
//! semaphore. A detection the ensemble cannot classify leaves only its error
//! case behind and never reaches the pending zone.

use std::sync::Arc;

use evpark_common::config::Config;
use evpark_common::EvidenceStore;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::camera::{spawn_camera, CameraHandle, SourceFactory, StreamContext};
use crate::classify::EnsembleClassifier;
use crate::debounce::ConfirmedDetection;
use crate::evidence::write_pending_case;
use crate::recognition::PlateRecognizer;

/// Shared services for every stream at a site
#[derive(Clone)]
pub struct PipelineServices {
    pub recognizer: Arc<dyn PlateRecognizer>,
    pub classifier: Arc<EnsembleClassifier>,
    pub store: Arc<EvidenceStore>,
}

/// Running stream: camera thread plus its classification task
pub struct StreamHandle {
    pub camera: CameraHandle,
    pub stage: JoinHandle<()>,
}

/// Start one supervised camera thread and classification stage per camera
///
/// `factory_for` builds each camera's frame source factory.
pub fn start_streams<F>(
    config: &Config,
    services: &PipelineServices,
    cancel: &CancellationToken,
    factory_for: F,
) -> std::io::Result<Vec<StreamHandle>>
where
    F: Fn(&evpark_common::config::CameraConfig) -> SourceFactory,
{
    let mut streams = Vec::with_capacity(config.cameras.len());

    for camera in &config.cameras {
        let (tx, rx) = mpsc::channel(config.anpr.detection_queue_capacity);

        let stage = tokio::spawn(run_classification_stage(
            camera.name.clone(),
            rx,
            Arc::clone(&services.classifier),
            Arc::clone(&services.store),
            config.anpr.evidence_writers,
        ));

        let ctx = Arc::new(StreamContext {
            camera: camera.clone(),
            anpr: config.anpr.clone(),
            recognizer: Arc::clone(&services.recognizer),
            source_factory: factory_for(camera),
        });
        let handle = spawn_camera(ctx, tx, cancel.clone())?;

        info!(camera = %camera.name, "Stream started");
        streams.push(StreamHandle { camera: handle, stage });
    }

    Ok(streams)
}

/// Classify each confirmed detection and write its pending case
///
/// Returns once the detection channel closes and all writes have finished.
pub async fn run_classification_stage(
    camera: String,
    mut detections: mpsc::Receiver<ConfirmedDetection>,
    classifier: Arc<EnsembleClassifier>,
    store: Arc<EvidenceStore>,
    writers: usize,
) {
    let permits = Arc::new(Semaphore::new(writers.max(1)));
    let mut writes: JoinSet<evpark_common::Result<std::path::PathBuf>> = JoinSet::new();

    loop {
        tokio::select! {
            Some(done) = writes.join_next(), if !writes.is_empty() => {
                log_write(&camera, done);
            }
            next = detections.recv() => {
                let Some(detection) = next else { break };

                let classify = Arc::clone(&classifier);
                let classified = tokio::task::spawn_blocking(move || {
                    let result = classify.classify(&detection.observation.frame, &detection.observation.candidate);
                    (detection, result)
                })
                .await;

                let (detection, result) = match classified {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(camera = %camera, error = %e, "Classification task failed");
                        continue;
                    }
                };

                // the classifier already saved an error case; nothing enters pending
                let Some(result) = result else {
                    warn!(camera = %camera, plate = %detection.plate, "Classification failed, dropping detection");
                    continue;
                };

                let permit = match Arc::clone(&permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let store = Arc::clone(&store);
                let camera_name = camera.clone();
                writes.spawn_blocking(move || {
                    let _permit = permit;
                    write_pending_case(&store, &camera_name, &detection, &result)
                });
            }
        }
    }

    while let Some(done) = writes.join_next().await {
        log_write(&camera, done);
    }
    info!(camera = %camera, "Classification stage stopped");
}

fn log_write(
    camera: &str,
    done: Result<evpark_common::Result<std::path::PathBuf>, tokio::task::JoinError>,
) {
    match done {
        Ok(Ok(path)) => debug!(camera, path = %path.display(), "Evidence saved"),
        Ok(Err(e)) => error!(camera, error = %e, "Failed to save evidence"),
        Err(e) => error!(camera, error = %e, "Evidence writer task failed"),
    }
}
