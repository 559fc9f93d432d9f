use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub mod capture;
pub mod history;
pub mod mock;
pub mod remote;

pub use history::DetectionHistory;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;
pub const DEFAULT_TRACKED_CLASSES: [&str; 2] = ["bus", "car"];

/// Vehicle-presence verdict for one processed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSample {
    pub timestamp: Instant,
    pub vehicle_present: bool,
    /// Highest matching confidence in `[0, 1]`, zero when nothing matched.
    pub confidence: f64,
}

impl DetectionSample {
    pub fn new(timestamp: Instant, vehicle_present: bool, confidence: f64) -> Self {
        Self {
            timestamp,
            vehicle_present,
            confidence,
        }
        .sanitized()
    }

    pub fn vehicle(timestamp: Instant, confidence: f64) -> Self {
        Self::new(timestamp, true, confidence)
    }

    pub fn clear(timestamp: Instant) -> Self {
        Self::new(timestamp, false, 0.0)
    }

    pub(crate) fn sanitized(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// One object reported by the vision model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

/// A captured camera frame, usually JPEG bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub captured_at: Instant,
}

pub trait FrameSource {
    fn capture(&mut self) -> Result<Frame, AppError>;
}

pub trait VehicleClassifier {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, AppError>;
}

/// Reduces raw detections to a [`DetectionSample`].
#[derive(Debug, Clone)]
pub struct ClassFilter {
    tracked_classes: Vec<String>,
    confidence_threshold: f64,
}

impl ClassFilter {
    pub fn new(tracked_classes: Vec<String>, confidence_threshold: f64) -> Self {
        Self {
            tracked_classes,
            confidence_threshold,
        }
    }

    pub fn tracks(&self, class_name: &str) -> bool {
        self.tracked_classes
            .iter()
            .any(|tracked| tracked.eq_ignore_ascii_case(class_name))
    }

    pub fn sample(&self, detections: &[Detection], timestamp: Instant) -> DetectionSample {
        let best = detections
            .iter()
            .filter(|d| self.tracks(&d.class_name))
            .filter(|d| d.confidence >= self.confidence_threshold)
            .map(|d| d.confidence)
            .fold(None, |best: Option<f64>, c| Some(best.map_or(c, |b| b.max(c))));

        match best {
            Some(confidence) => DetectionSample::vehicle(timestamp, confidence),
            None => DetectionSample::clear(timestamp),
        }
    }
}

impl Default for ClassFilter {
    fn default() -> Self {
        Self::new(
            DEFAULT_TRACKED_CLASSES.iter().map(|c| c.to_string()).collect(),
            DEFAULT_CONFIDENCE_THRESHOLD,
        )
    }
}
