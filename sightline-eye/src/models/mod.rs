//! Model backends
//!
//! Inference itself is a black box to the pipeline. Each capability is a
//! narrow trait so the fusion logic can run against deterministic fakes.

pub mod brief;
#[cfg(feature = "onnx")]
pub mod depth_anything;
#[cfg(feature = "onnx")]
pub mod yolo;

use crate::error::Result;
use crate::frame::{Frame, Region};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

pub use brief::BriefExtractor;
#[cfg(feature = "onnx")]
pub use depth_anything::DepthAnythingEstimator;
#[cfg(feature = "onnx")]
pub use yolo::YoloDetector;

/// Unnormalized detector output in frame pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
}

/// Object detector. Called once per frame.
pub trait ObjectDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>>;
}

/// Dense relative depth map
#[derive(Debug, Clone)]
pub struct DepthMap {
    pub width: u32,
    pub height: u32,
    /// Row-major samples
    pub values: Vec<f32>,
}

impl DepthMap {
    /// Sample at `(h / 2, w / 2)`
    pub fn center_value(&self) -> Option<f32> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let idx = (self.height as usize / 2) * self.width as usize + self.width as usize / 2;
        self.values.get(idx).copied()
    }
}

/// Monocular depth estimator
pub trait DepthEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    fn depth_map(&self, frame: &Frame) -> Result<DepthMap>;
}

/// Keypoint attached to a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub angle: f32,
}

/// Fixed-length binary feature vector
pub type Descriptor = Vec<u8>;

/// Local features extracted from one image
#[derive(Debug, Clone, Default)]
pub struct LocalFeatures {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl LocalFeatures {
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Local keypoint + binary descriptor extractor
pub trait FeatureExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, image: &GrayImage) -> Result<LocalFeatures>;
}

/// Narrows a person crop down to the face. `None` means no face was found.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, image: &RgbImage) -> Option<Region>;
}
