//! Scene summary text

use crate::processing::detection::{Detection, Position};

pub const NO_OBJECTS: &str = "No objects detected";
pub const INVALID_FRAME: &str = "Invalid frame";
pub const DETECTION_ERROR: &str = "Detection error";

/// Builds the untranslated summary for a frame's detections
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneSummarizer {
    describe_positions: bool,
}

impl SceneSummarizer {
    pub fn new(describe_positions: bool) -> Self {
        Self { describe_positions }
    }

    /// Unique labels (or positional phrases) in first-seen order, joined
    /// with `", "`
    pub fn summarize(&self, detections: &[Detection]) -> String {
        if detections.is_empty() {
            return NO_OBJECTS.to_string();
        }

        let mut parts: Vec<String> = Vec::with_capacity(detections.len());
        for detection in detections {
            let part = if self.describe_positions {
                describe(detection)
            } else {
                detection.label.clone()
            };
            if !parts.contains(&part) {
                parts.push(part);
            }
        }
        parts.join(", ")
    }
}

fn describe(detection: &Detection) -> String {
    match detection.position {
        Position::Left => format!("{} is on the left", detection.label),
        Position::Right => format!("{} is on the right", detection.label),
        Position::Center => format!("{} is in the center", detection.label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::detection::BoundingBox;

    fn detection(label: &str, position: Position) -> Detection {
        Detection {
            label: label.to_string(),
            confidence: 0.9,
            bbox: BoundingBox { x1: 0, y1: 0, x2: 10, y2: 10 },
            position,
            match_count: None,
        }
    }

    #[test]
    fn test_empty_scene() {
        assert_eq!(SceneSummarizer::default().summarize(&[]), NO_OBJECTS);
    }

    #[test]
    fn test_unique_labels_in_order() {
        let detections = vec![
            detection("person", Position::Left),
            detection("car", Position::Right),
            detection("person", Position::Center),
            detection("alice", Position::Center),
        ];
        assert_eq!(SceneSummarizer::default().summarize(&detections), "person, car, alice");
    }

    #[test]
    fn test_positional_phrases() {
        let detections = vec![
            detection("chair", Position::Left),
            detection("door", Position::Center),
            detection("chair", Position::Left),
            detection("dog", Position::Right),
        ];
        assert_eq!(
            SceneSummarizer::new(true).summarize(&detections),
            "chair is on the left, door is in the center, dog is on the right"
        );
    }
}
