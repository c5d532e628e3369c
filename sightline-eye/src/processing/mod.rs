//! Per-frame processing stages

pub mod depth;
pub mod detection;
pub mod reid;

pub use depth::{DepthEstimate, DepthSmoother, DepthStage, DepthWorkerPool};
pub use detection::{classify_position, BoundingBox, Detection, DetectionStage, Position};
pub use reid::ReIdentificationStage;
