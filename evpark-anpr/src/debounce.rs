//! Per-stream plate debounce
//!
//! A camera sees the same plate in many consecutive frames, and the engine
//! occasionally misreads it. The aggregator keeps the last N accepted plate
//! texts and fires exactly once when a text's count in the window reaches T.
//! Firing is edge-triggered: while the count stays at T or above nothing new
//! is emitted, and the plate can only fire again after its count has dropped
//! below T and climbed back.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Local};
use evpark_common::plate::{is_valid_plate, Plate};
use image::RgbImage;
use tracing::debug;

use crate::error::DebounceError;
use crate::recognition::{PlateArea, PlateCandidate};

/// One recognized plate in one frame
#[derive(Debug, Clone)]
pub struct PlateObservation {
    pub candidate: PlateCandidate,
    /// Every candidate the engine reported for the frame
    pub raw_output: Vec<PlateCandidate>,
    /// Frame the engine saw (after ROI cropping); plate geometry is relative to it
    pub frame: Arc<RgbImage>,
    /// Uncropped camera frame, kept as evidence
    pub source_frame: Arc<RgbImage>,
    pub captured_at: DateTime<Local>,
}

impl PlateObservation {
    pub fn plate_text(&self) -> &str {
        &self.candidate.text
    }

    pub fn geometry(&self) -> Option<PlateArea> {
        self.candidate.area
    }
}

/// Emitted once per physical pass of a vehicle
#[derive(Debug, Clone)]
pub struct ConfirmedDetection {
    pub plate: Plate,
    pub observation: PlateObservation,
}

impl ConfirmedDetection {
    pub fn occurred_at(&self) -> DateTime<Local> {
        self.observation.captured_at
    }
}

/// Sliding-window vote over recent plate texts
#[derive(Debug)]
pub struct DebounceAggregator {
    window: VecDeque<String>,
    capacity: usize,
    threshold: usize,
}

impl DebounceAggregator {
    pub fn new(capacity: usize, threshold: usize) -> Result<Self, DebounceError> {
        if capacity == 0 {
            return Err(DebounceError::ZeroCapacity);
        }
        if threshold == 0 {
            return Err(DebounceError::ZeroThreshold);
        }
        if threshold > capacity {
            return Err(DebounceError::ThresholdExceedsCapacity {
                threshold,
                capacity,
            });
        }

        Ok(Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            threshold,
        })
    }

    /// Feed one observation; returns a detection when this insertion moves
    /// the plate's count from T-1 to T
    pub fn observe(&mut self, observation: PlateObservation) -> Option<ConfirmedDetection> {
        let text = observation.plate_text().trim();
        if !is_valid_plate(text) {
            debug!(text, "Ignoring text that is not a plate");
            return None;
        }

        if self.push(text) {
            let plate = Plate::parse(text).ok()?;
            Some(ConfirmedDetection { plate, observation })
        } else {
            None
        }
    }

    /// Insert a grammar-checked text and report whether its count just rose
    /// from below the threshold to the threshold
    fn push(&mut self, text: &str) -> bool {
        let before = self.count(text);
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(text.to_string());

        before < self.threshold && self.count(text) == self.threshold
    }

    pub fn count(&self, text: &str) -> usize {
        self.window.iter().filter(|t| t.as_str() == text).count()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
