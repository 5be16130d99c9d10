//! Camera frame acquisition
//!
//! Each stream has a [`FrameSource`] that yields decoded RGB frames and is
//! reopened through its [`SourceFactory`] after a disconnect. The shipped
//! source polls a camera's JPEG snapshot endpoint.

pub mod worker;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use evpark_common::config::CameraConfig;
use image::{imageops, RgbImage};
use reqwest::blocking::Client;

use crate::error::CaptureError;

pub use worker::{spawn_camera, CameraHandle, CameraWorker, StreamContext};

/// Blocking frame producer owned by one camera thread
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

/// Opens (or reopens) a stream's frame source
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn FrameSource>, CaptureError> + Send + Sync>;

/// Polls an HTTP snapshot endpoint at a fixed interval
pub struct SnapshotSource {
    client: Client,
    url: String,
    interval: Duration,
    last_read: Option<Instant>,
}

impl SnapshotSource {
    /// Creates a blocking HTTP client; call from the camera thread
    pub fn connect(url: &str, interval: Duration, timeout: Duration) -> Result<Self, CaptureError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            interval,
            last_read: None,
        })
    }

    /// Factory for a configured camera
    pub fn factory(camera: &CameraConfig) -> SourceFactory {
        let url = camera.snapshot_url.clone();
        let interval = Duration::from_millis(camera.frame_interval_ms);
        let timeout = Duration::from_secs(5).max(interval);
        Arc::new(move || {
            let source = SnapshotSource::connect(&url, interval, timeout)?;
            Ok(Box::new(source) as Box<dyn FrameSource>)
        })
    }
}

impl FrameSource for SnapshotSource {
    fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
        if let Some(last) = self.last_read {
            let since = last.elapsed();
            if since < self.interval {
                thread::sleep(self.interval - since);
            }
        }
        self.last_read = Some(Instant::now());

        let response = self.client.get(&self.url).send()?;
        if !response.status().is_success() {
            return Err(CaptureError::Disconnected(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }
        let bytes = response.bytes()?;
        Ok(image::load_from_memory(&bytes)?.to_rgb8())
    }
}

/// Crop a frame to its `[y1, y2, x1, x2]` ratio region
///
/// Returns `None` when no ROI is configured or it collapses to nothing.
pub fn apply_roi(frame: &RgbImage, roi: Option<[f32; 4]>) -> Option<RgbImage> {
    let [y1, y2, x1, x2] = roi?;
    let (w, h) = (frame.width() as f32, frame.height() as f32);

    let top = (y1 * h) as u32;
    let bottom = ((y2 * h) as u32).min(frame.height());
    let left = (x1 * w) as u32;
    let right = ((x2 * w) as u32).min(frame.width());

    if bottom <= top || right <= left {
        return None;
    }
    Some(imageops::crop_imm(frame, left, top, right - left, bottom - top).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_ratios_map_to_pixels() {
        let frame = RgbImage::new(200, 100);
        let roi = apply_roi(&frame, Some([0.2, 0.8, 0.5, 1.0])).unwrap();
        assert_eq!(roi.dimensions(), (100, 60));
    }

    #[test]
    fn test_missing_or_empty_roi() {
        let frame = RgbImage::new(200, 100);
        assert!(apply_roi(&frame, None).is_none());
        assert!(apply_roi(&frame, Some([0.5, 0.5, 0.0, 1.0])).is_none());
    }
}
