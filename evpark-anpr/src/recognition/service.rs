//! HTTP adapter for the plate recognition service
//!
//! Raw pixels are posted as the request body; dimensions, pixel format and
//! the engine option string travel as query parameters. The service answers
//! with the engine's JSON candidate list.

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info};

use super::{PixelFormat, PlateCandidate, PlateRecognizer};
use crate::error::RecognitionError;

const USER_AGENT: &str = concat!("evpark-anpr/", env!("CARGO_PKG_VERSION"));

/// Blocking recognition client
///
/// Must be created and dropped outside an async context.
pub struct HttpPlateRecognizer {
    client: Client,
    base_url: String,
}

impl HttpPlateRecognizer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RecognitionError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl PlateRecognizer for HttpPlateRecognizer {
    fn initialize(&self) -> Result<(), RecognitionError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| RecognitionError::Unavailable(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(RecognitionError::Unavailable(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        info!(url = %self.base_url, "Plate recognizer ready");
        Ok(())
    }

    fn recognize(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        options: &str,
    ) -> Result<Vec<PlateCandidate>, RecognitionError> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(RecognitionError::Malformed(format!(
                "pixel buffer is {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            )));
        }

        let response = self
            .client
            .post(format!("{}/recognize", self.base_url))
            .query(&[
                ("width", width.to_string()),
                ("height", height.to_string()),
                ("format", format.as_str().to_string()),
                ("options", options.to_string()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(pixels.to_vec())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RecognitionError::Status(status.as_u16()));
        }

        let body = response.text()?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let candidates: Vec<PlateCandidate> =
            serde_json::from_str(&body).map_err(|e| RecognitionError::Malformed(e.to_string()))?;
        debug!(count = candidates.len(), "Recognizer returned candidates");
        Ok(candidates)
    }
}
