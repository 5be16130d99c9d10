//! Error types for the camera pipeline

use thiserror::Error;

/// Debounce aggregator construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebounceError {
    #[error("window capacity must be > 0")]
    ZeroCapacity,

    #[error("count threshold must be > 0")]
    ZeroThreshold,

    /// A threshold above the capacity can never be reached
    #[error("count threshold {threshold} exceeds window capacity {capacity}")]
    ThresholdExceedsCapacity { threshold: usize, capacity: usize },
}

/// Plate recognition engine errors
#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Recognizer unavailable: {0}")]
    Unavailable(String),

    #[error("Recognizer HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Recognizer returned status {0}")]
    Status(u16),

    #[error("Malformed recognizer output: {0}")]
    Malformed(String),
}

/// Frame acquisition errors; always followed by reconnect back-off
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Source disconnected: {0}")]
    Disconnected(String),

    #[error("Snapshot HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Frame decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Scorer loading and evaluation errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read model {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse model {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid model: {0}")]
    Invalid(String),

    #[error("Feature vector has {actual} values, model expects at least {expected}")]
    FeatureCount { expected: usize, actual: usize },
}

/// One classification attempt failed
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// Input rejected before any work; never retried
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Preprocessing failed: {0}")]
    Preprocess(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Processing time exceeded: {elapsed_ms} ms > {limit_ms} ms")]
    Timeout { elapsed_ms: u128, limit_ms: u128 },
}

impl ClassifyError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClassifyError::InvalidInput(_))
    }
}
