//! Depth-Anything-V2 monocular depth on ONNX Runtime

use crate::error::{PerceptionError, Result};
use crate::frame::Frame;
use crate::models::{DepthEstimator, DepthMap};
use crate::utils::{apply_imagenet_normalization, rgb_to_chw_tensor};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

pub struct DepthAnythingEstimator {
    session: Mutex<Session>,
    input_size: u32,
}

impl DepthAnythingEstimator {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| PerceptionError::Model(format!("Failed to create session builder: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| PerceptionError::Model(format!("Failed to load depth model: {}", e)))?;

        info!("Depth model loaded from {:?}", model_path);
        Ok(Self {
            session: Mutex::new(session),
            input_size: 518,
        })
    }
}

impl DepthEstimator for DepthAnythingEstimator {
    fn name(&self) -> &'static str {
        "depth-anything-v2"
    }

    fn depth_map(&self, frame: &Frame) -> Result<DepthMap> {
        let size = self.input_size;
        let mut input = rgb_to_chw_tensor(frame.image(), size, size)?;
        apply_imagenet_normalization(&mut input);
        let tensor = Tensor::from_array(([1usize, 3, size as usize, size as usize], input))
            .map_err(|e| PerceptionError::Model(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| PerceptionError::Depth(format!("Depth inference failed: {}", e)))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PerceptionError::Depth(format!("Failed to extract depth tensor: {}", e)))?;

        // [1, H, W] or [1, 1, H, W]
        let dims: Vec<usize> = shape.iter().map(|d| (*d).max(0) as usize).collect();
        let (height, width) = match dims.as_slice() {
            [.., h, w] => (*h, *w),
            _ => return Err(PerceptionError::Depth(format!("unexpected depth shape {:?}", dims))),
        };
        if data.len() < width * height {
            return Err(PerceptionError::Depth("depth output shorter than its shape".to_string()));
        }
        debug!("Depth output {}x{}", width, height);

        Ok(DepthMap {
            width: width as u32,
            height: height as u32,
            values: to_depth_image(&data[..width * height]),
        })
    }
}

/// Min-max scale raw network output to the 0..255 range of a depth image
pub(crate) fn to_depth_image(raw: &[f32]) -> Vec<f32> {
    let (min, max) = raw
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return vec![0.0; raw.len()];
    }
    raw.iter()
        .map(|v| if v.is_finite() { ((v - min) / range * 255.0).round() } else { 0.0 })
        .collect()
}
