//! Depth stage
//!
//! The center sample of a relative depth map is converted to centimetres
//! with a fixed pinhole calibration and averaged over a trailing window.
//! The window is shared by every session using the same `DepthStage`, so
//! concurrent sessions advance each other's confidence ramp.

use crate::config::DepthCalibration;
use crate::error::{PerceptionError, Result};
use crate::frame::Frame;
use crate::models::DepthEstimator;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Smoothed distance estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthEstimate {
    #[serde(rename = "depth")]
    pub distance_cm: f64,
    pub confidence: f64,
    pub unit: String,
}

/// Fixed-capacity moving average, oldest sample evicted first
#[derive(Debug)]
pub struct DepthSmoother {
    capacity: usize,
    window: Mutex<VecDeque<f64>>,
}

impl DepthSmoother {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.window.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.lock().is_empty()
    }

    /// Record a raw distance and return the smoothed estimate
    pub fn push(&self, raw_cm: f64) -> DepthEstimate {
        let mut window = self.window.lock();
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(raw_cm);

        let mean = window.iter().sum::<f64>() / window.len() as f64;
        DepthEstimate {
            distance_cm: (mean * 10.0).round() / 10.0,
            confidence: (window.len() as f64 / self.capacity as f64).min(1.0),
            unit: "cm".to_string(),
        }
    }
}

pub struct DepthStage {
    estimator: Arc<dyn DepthEstimator>,
    calibration: DepthCalibration,
    smoother: Arc<DepthSmoother>,
}

impl DepthStage {
    pub fn new(
        estimator: Arc<dyn DepthEstimator>,
        calibration: DepthCalibration,
        smoother: Arc<DepthSmoother>,
    ) -> Self {
        Self {
            estimator,
            calibration,
            smoother,
        }
    }

    pub fn smoother(&self) -> &Arc<DepthSmoother> {
        &self.smoother
    }

    /// Calibrated distance in centimetres for a raw center depth value
    pub fn raw_distance_cm(&self, center_value: f64) -> f64 {
        let c = &self.calibration;
        (c.focal_length * c.reference_height_m) / (center_value * c.reference_pixel_height + c.epsilon)
            * 100.0
    }

    /// Estimate depth at the frame center. Failed frames leave the window
    /// untouched.
    pub fn estimate(&self, frame: &Frame) -> Result<DepthEstimate> {
        let map = self.estimator.depth_map(frame)?;
        let center = map
            .center_value()
            .ok_or_else(|| PerceptionError::Depth("empty depth map".to_string()))?;
        if !center.is_finite() {
            return Err(PerceptionError::Depth(format!("non-finite depth sample {}", center)));
        }

        let raw = self.raw_distance_cm(center as f64);
        if !raw.is_finite() {
            return Err(PerceptionError::Depth(format!("non-finite distance for sample {}", center)));
        }
        debug!("Depth center sample {} -> {:.1} cm", center, raw);
        Ok(self.smoother.push(raw))
    }
}

/// Bounded pool for depth inference shared across sessions. Requests beyond
/// the worker count wait for a permit.
#[derive(Clone)]
pub struct DepthWorkerPool {
    stage: Arc<DepthStage>,
    permits: Arc<Semaphore>,
}

impl DepthWorkerPool {
    pub fn new(stage: Arc<DepthStage>, workers: usize) -> Self {
        Self {
            stage,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn stage(&self) -> &Arc<DepthStage> {
        &self.stage
    }

    /// Run the depth stage on a blocking worker. Any failure yields `None`.
    pub async fn estimate(&self, frame: Arc<Frame>) -> Option<DepthEstimate> {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!("Depth pool closed: {}", e);
                return None;
            }
        };

        let stage = self.stage.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            stage.estimate(&frame)
        })
        .await;

        match result {
            Ok(Ok(estimate)) => Some(estimate),
            Ok(Err(e)) => {
                warn!("Depth estimation failed: {}", e);
                None
            }
            Err(e) => {
                warn!("Depth worker aborted: {}", e);
                None
            }
        }
    }
}
