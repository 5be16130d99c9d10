//! Plate recognition capability
//!
//! The recognition engine is an external collaborator. Camera workers call it
//! synchronously on their own thread through [`PlateRecognizer`]; the shipped
//! adapter talks to a recognition service over HTTP.

pub mod service;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::RecognitionError;

pub use service::HttpPlateRecognizer;

/// Channel order of the raw pixel buffer handed to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb,
    Bgr,
}

impl PixelFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Rgb => "RGB",
            PixelFormat::Bgr => "BGR",
        }
    }
}

/// Plate quadrilateral in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "AreaRepr")]
pub struct PlateArea {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Degrees, counter-clockwise
    pub angle: f64,
}

/// Engines report the area either as an object or as `[x, y, width, height]`
#[derive(Deserialize)]
#[serde(untagged)]
enum AreaRepr {
    Fields {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        #[serde(default)]
        angle: f64,
    },
    List([f64; 4]),
}

impl From<AreaRepr> for PlateArea {
    fn from(repr: AreaRepr) -> Self {
        match repr {
            AreaRepr::Fields {
                x,
                y,
                width,
                height,
                angle,
            } => PlateArea {
                x,
                y,
                width,
                height,
                angle,
            },
            AreaRepr::List([x, y, width, height]) => PlateArea {
                x,
                y,
                width,
                height,
                angle: 0.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionConfidence {
    #[serde(default)]
    pub ocr: f64,
    #[serde(default)]
    pub plate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlateAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ev: Option<bool>,
}

/// One plate reported by the engine for a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateCandidate {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "conf", default)]
    pub confidence: RecognitionConfidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<PlateArea>,
    #[serde(default)]
    pub attrs: PlateAttributes,
    /// Older engine builds put the EV flag at top level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ev: Option<bool>,
}

impl PlateCandidate {
    /// The engine's own EV guess
    pub fn ev_hint(&self) -> bool {
        self.attrs.ev.or(self.ev).unwrap_or(false)
    }
}

/// Blocking plate recognition
pub trait PlateRecognizer: Send + Sync {
    /// Prepare the engine; failure is fatal at startup
    fn initialize(&self) -> Result<(), RecognitionError>;

    fn recognize(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        options: &str,
    ) -> Result<Vec<PlateCandidate>, RecognitionError>;

    fn recognize_frame(&self, frame: &RgbImage, options: &str) -> Result<Vec<PlateCandidate>, RecognitionError> {
        self.recognize(frame.as_raw(), frame.width(), frame.height(), PixelFormat::Rgb, options)
    }
}
