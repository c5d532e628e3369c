//! Configuration for sightline-eye

use serde::{Deserialize, Serialize};

/// Camera calibration used to turn a raw depth sample into centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthCalibration {
    /// Focal length in pixels
    pub focal_length: f64,
    /// Height of the reference object in metres
    pub reference_height_m: f64,
    /// Height of the reference object in pixels
    pub reference_pixel_height: f64,
    /// Guards the division when the depth sample is zero
    pub epsilon: f64,
}

impl Default for DepthCalibration {
    fn default() -> Self {
        Self {
            focal_length: 900.0,
            reference_height_m: 1.725,
            reference_pixel_height: 1360.0,
            epsilon: 1e-6,
        }
    }
}

/// Perception pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Language the pipeline produces text in; translation is skipped for it
    pub default_language: String,
    /// Fraction of the frame width treated as "center"
    pub position_dead_zone: f32,
    /// Minimum person confidence before re-identification runs
    pub reid_confidence_threshold: f32,
    /// Minimum good correspondences for an identity match
    pub min_matches: usize,
    /// Maximum Hamming distance of a good correspondence
    pub max_hamming_distance: u32,
    /// Upper bound on detections kept per frame
    pub max_detections: usize,
    /// Depth calibration constants
    pub depth: DepthCalibration,
    /// Capacity of the trailing depth smoothing window
    pub smoothing_window: usize,
    /// Size of the shared depth worker pool
    pub depth_workers: usize,
    /// Capacity of the translation memoization table
    pub translation_cache_capacity: usize,
    /// Describe each detection with its position instead of listing labels
    pub describe_positions: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
            position_dead_zone: 0.05,
            reid_confidence_threshold: 0.5,
            min_matches: 10,
            max_hamming_distance: 50,
            max_detections: 100,
            depth: DepthCalibration::default(),
            smoothing_window: 10,
            depth_workers: 2,
            translation_cache_capacity: 1000,
            describe_positions: false,
        }
    }
}

impl PipelineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.default_language.trim().is_empty() {
            return Err("default_language cannot be empty".to_string());
        }

        if !(0.0..0.5).contains(&self.position_dead_zone) {
            return Err("position_dead_zone must be in [0, 0.5)".to_string());
        }

        if !(0.0..=1.0).contains(&self.reid_confidence_threshold) {
            return Err("reid_confidence_threshold must be in [0, 1]".to_string());
        }

        // Descriptors are at most 256 bits in the built-in extractor
        if self.max_hamming_distance == 0 || self.max_hamming_distance > 256 {
            return Err("max_hamming_distance must be between 1 and 256".to_string());
        }

        if self.max_detections == 0 {
            return Err("max_detections must be > 0".to_string());
        }

        if self.smoothing_window == 0 || self.smoothing_window > 1000 {
            return Err("smoothing_window must be between 1 and 1000".to_string());
        }

        if self.depth_workers == 0 || self.depth_workers > 64 {
            return Err("depth_workers must be between 1 and 64".to_string());
        }

        if self.translation_cache_capacity == 0 {
            return Err("translation_cache_capacity must be > 0".to_string());
        }

        let calibration = &self.depth;
        if !(calibration.focal_length > 0.0
            && calibration.reference_height_m > 0.0
            && calibration.reference_pixel_height > 0.0)
        {
            return Err("depth calibration constants must be positive".to_string());
        }

        if !(calibration.epsilon > 0.0) {
            return Err("depth.epsilon must be > 0".to_string());
        }

        Ok(())
    }
}
