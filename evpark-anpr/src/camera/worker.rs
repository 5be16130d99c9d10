//! Per-camera worker thread and its supervisor
//!
//! Frame reads and recognition are blocking, so every stream owns a
//! dedicated OS thread with its own debounce window. Confirmed detections
//! leave through a bounded channel with `try_send`: a full queue drops the
//! detection instead of stalling frame ingestion. A supervisor thread joins
//! the worker and restarts it after a panic; one stream's failure never
//! touches the others.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use evpark_common::config::{AnprConfig, CameraConfig};
use image::RgbImage;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{apply_roi, FrameSource, SourceFactory};
use crate::debounce::{ConfirmedDetection, DebounceAggregator, PlateObservation};
use crate::error::DebounceError;
use crate::recognition::PlateRecognizer;

const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Everything a stream needs to (re)start its worker
pub struct StreamContext {
    pub camera: CameraConfig,
    pub anpr: AnprConfig,
    pub recognizer: Arc<dyn PlateRecognizer>,
    pub source_factory: SourceFactory,
}

impl StreamContext {
    fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.anpr.reconnect_delay_secs)
    }
}

/// Why a worker loop returned normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    /// Classification stage is gone; nothing left to feed
    ChannelClosed,
}

/// Frame loop of one camera stream
pub struct CameraWorker {
    ctx: Arc<StreamContext>,
    aggregator: DebounceAggregator,
    detections: mpsc::Sender<ConfirmedDetection>,
    dropped: u64,
}

impl CameraWorker {
    pub fn new(
        ctx: Arc<StreamContext>,
        detections: mpsc::Sender<ConfirmedDetection>,
    ) -> Result<Self, DebounceError> {
        let aggregator = DebounceAggregator::new(ctx.anpr.plate_window_size, ctx.anpr.plate_count_threshold)?;
        Ok(Self {
            ctx,
            aggregator,
            detections,
            dropped: 0,
        })
    }

    /// Read frames until cancelled, reconnecting after every source failure
    pub fn run(mut self, cancel: &CancellationToken) -> WorkerExit {
        let name = self.ctx.camera.name.clone();
        let mut source: Option<Box<dyn FrameSource>> = None;

        info!(camera = %name, "Camera worker started");
        while !cancel.is_cancelled() {
            if source.is_none() {
                match (self.ctx.source_factory)() {
                    Ok(opened) => {
                        info!(camera = %name, "Frame source opened");
                        source = Some(opened);
                    }
                    Err(e) => {
                        warn!(camera = %name, error = %e, "Failed to open frame source, retrying");
                        sleep_unless_cancelled(cancel, self.ctx.reconnect_delay());
                        continue;
                    }
                }
            }
            let Some(active) = source.as_mut() else {
                continue;
            };

            match active.read_frame() {
                Ok(frame) => {
                    if self.process_frame(frame).is_break() {
                        warn!(camera = %name, "Detection channel closed, stopping worker");
                        return WorkerExit::ChannelClosed;
                    }
                }
                Err(e) => {
                    warn!(camera = %name, error = %e, "Stream disconnected, reconnecting");
                    source = None;
                    sleep_unless_cancelled(cancel, self.ctx.reconnect_delay());
                }
            }
        }

        info!(camera = %name, dropped = self.dropped, "Camera worker stopped");
        WorkerExit::Cancelled
    }

    /// Recognize one frame and feed the first plate into the debounce window
    ///
    /// Breaks only when the detection channel has closed.
    pub fn process_frame(&mut self, frame: RgbImage) -> ControlFlow<()> {
        let source_frame = Arc::new(frame);
        let frame = match apply_roi(&source_frame, self.ctx.camera.roi) {
            Some(roi) => Arc::new(roi),
            None => Arc::clone(&source_frame),
        };

        let candidates = match self
            .ctx
            .recognizer
            .recognize_frame(&frame, &self.ctx.anpr.recognizer_options)
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(camera = %self.ctx.camera.name, error = %e, "Recognition failed, skipping frame");
                return ControlFlow::Continue(());
            }
        };

        let Some(candidate) = candidates.first().cloned() else {
            return ControlFlow::Continue(());
        };

        let observation = PlateObservation {
            candidate,
            raw_output: candidates,
            frame,
            source_frame,
            captured_at: Local::now(),
        };

        let Some(detection) = self.aggregator.observe(observation) else {
            return ControlFlow::Continue(());
        };

        info!(
            camera = %self.ctx.camera.name,
            plate = %detection.plate,
            recognizer_ev = detection.observation.candidate.ev_hint(),
            "Plate confirmed"
        );

        match self.detections.try_send(detection) {
            Ok(()) => ControlFlow::Continue(()),
            Err(TrySendError::Full(dropped)) => {
                self.dropped += 1;
                warn!(
                    camera = %self.ctx.camera.name,
                    plate = %dropped.plate,
                    dropped_total = self.dropped,
                    "Classification queue full, dropping detection"
                );
                ControlFlow::Continue(())
            }
            Err(TrySendError::Closed(_)) => ControlFlow::Break(()),
        }
    }
}

/// Supervisor of one camera's worker thread
pub struct CameraHandle {
    pub name: String,
    supervisor: JoinHandle<()>,
}

impl CameraHandle {
    /// Wait for the supervisor (and its worker) to finish
    pub fn join(self) {
        if self.supervisor.join().is_err() {
            error!(camera = %self.name, "Camera supervisor panicked");
        }
    }
}

/// Start a supervised worker thread for one camera
pub fn spawn_camera(
    ctx: Arc<StreamContext>,
    detections: mpsc::Sender<ConfirmedDetection>,
    cancel: CancellationToken,
) -> std::io::Result<CameraHandle> {
    let name = ctx.camera.name.clone();
    let supervisor = thread::Builder::new()
        .name(format!("supervise-{name}"))
        .spawn(move || supervise(ctx, detections, cancel))?;

    Ok(CameraHandle { name, supervisor })
}

fn supervise(ctx: Arc<StreamContext>, detections: mpsc::Sender<ConfirmedDetection>, cancel: CancellationToken) {
    let name = ctx.camera.name.clone();
    let mut restarts = 0u32;

    while !cancel.is_cancelled() {
        let worker = match CameraWorker::new(Arc::clone(&ctx), detections.clone()) {
            Ok(worker) => worker,
            Err(e) => {
                error!(camera = %name, error = %e, "Invalid debounce settings, camera disabled");
                return;
            }
        };

        let worker_cancel = cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("camera-{name}"))
            .spawn(move || worker.run(&worker_cancel));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!(camera = %name, error = %e, "Failed to spawn camera thread");
                sleep_unless_cancelled(&cancel, ctx.reconnect_delay());
                continue;
            }
        };

        match handle.join() {
            Ok(exit) => {
                debug!(camera = %name, ?exit, "Camera worker exited");
                return;
            }
            Err(_) => {
                restarts += 1;
                error!(camera = %name, restarts, "Camera worker panicked, restarting");
                sleep_unless_cancelled(&cancel, ctx.reconnect_delay());
            }
        }
    }
}

/// Sleep in short slices so shutdown is not held up by a back-off
pub fn sleep_unless_cancelled(cancel: &CancellationToken, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}
