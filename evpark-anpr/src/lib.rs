//! evpark-anpr library
//!
//! Camera-side half of the EV parking monitor: turns noisy per-frame plate
//! recognition into one confirmed detection per vehicle pass, classifies the
//! vehicle's powertrain, and writes the evidence case into the pending zone
//! for the reconciler.

pub mod camera;
pub mod classify;
pub mod debounce;
pub mod error;
pub mod evidence;
pub mod pipeline;
pub mod recognition;

pub use debounce::{ConfirmedDetection, DebounceAggregator, PlateObservation};
pub use error::{CaptureError, ClassifyError, DebounceError, ModelError, RecognitionError};
