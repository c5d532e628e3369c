//! Object detection stage

use crate::error::{PerceptionError, Result};
use crate::frame::{Frame, Region};
use crate::models::{ObjectDetector, RawDetection};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Horizontal position of a detection relative to the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Center,
    Right,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Left => "left",
            Position::Center => "center",
            Position::Right => "right",
        }
    }
}

/// Integer pixel box, serialized as `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "[u32; 4]")]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn center_x(&self) -> f32 {
        (self.x1 + self.x2) as f32 / 2.0
    }

    pub fn region(&self) -> Region {
        Region {
            x1: self.x1,
            y1: self.y1,
            x2: self.x2,
            y2: self.y2,
        }
    }
}

impl From<[u32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [u32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        for v in [self.x1, self.y1, self.x2, self.y2] {
            seq.serialize_element(&v)?;
        }
        seq.end()
    }
}

/// Normalized detection as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_count: Option<usize>,
}

/// Classify a horizontal center against the frame midline. Distances up to
/// and including `dead_zone_frac * width` count as center.
pub fn classify_position(center_x: f32, frame_width: u32, dead_zone_frac: f32) -> Position {
    let mid = frame_width as f32 / 2.0;
    let dead_zone = dead_zone_frac * frame_width as f32;
    if (center_x - mid).abs() <= dead_zone {
        Position::Center
    } else if center_x < mid {
        Position::Left
    } else {
        Position::Right
    }
}

pub struct DetectionStage {
    detector: Arc<dyn ObjectDetector>,
    dead_zone: f32,
    max_detections: usize,
}

impl DetectionStage {
    pub fn new(detector: Arc<dyn ObjectDetector>, dead_zone: f32, max_detections: usize) -> Self {
        Self {
            detector,
            dead_zone,
            max_detections,
        }
    }

    /// Run the detector and normalize its output. A detector failure,
    /// including a panic, is reported as `PerceptionError::Detection`.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let raw = match catch_unwind(AssertUnwindSafe(|| self.detector.detect(frame))) {
            Ok(Ok(raw)) => raw,
            Ok(Err(PerceptionError::Detection(msg))) => return Err(PerceptionError::Detection(msg)),
            Ok(Err(e)) => return Err(PerceptionError::Detection(e.to_string())),
            Err(_) => {
                warn!("Detector '{}' panicked", self.detector.name());
                return Err(PerceptionError::Detection(format!(
                    "detector '{}' panicked",
                    self.detector.name()
                )));
            }
        };

        let raw_count = raw.len();
        let detections: Vec<Detection> = raw
            .into_iter()
            .filter_map(|d| self.normalize(d, frame.width(), frame.height()))
            .take(self.max_detections)
            .collect();

        debug!("Detector '{}': {} raw, {} kept", self.detector.name(), raw_count, detections.len());
        Ok(detections)
    }

    fn normalize(&self, raw: RawDetection, width: u32, height: u32) -> Option<Detection> {
        if !raw.confidence.is_finite() || raw.bbox.iter().any(|v| !v.is_finite()) {
            return None;
        }
        if width == 0 || height == 0 {
            return None;
        }

        // `as` truncates toward zero and saturates negatives to 0
        let [x1, y1, x2, y2] = raw.bbox.map(|v| v as u32);
        let bbox = BoundingBox {
            x1: x1.min(width - 1),
            y1: y1.min(height - 1),
            x2: x2.min(width),
            y2: y2.min(height),
        };
        if bbox.x1 >= bbox.x2 || bbox.y1 >= bbox.y2 {
            return None;
        }

        Some(Detection {
            label: raw.label,
            confidence: raw.confidence.clamp(0.0, 1.0),
            position: classify_position(bbox.center_x(), width, self.dead_zone),
            bbox,
            match_count: None,
        })
    }
}
