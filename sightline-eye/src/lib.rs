//! sightline-eye: perception core for an assistive-vision device
//!
//! Decodes streamed camera frames, detects objects, re-identifies enrolled
//! people from local feature descriptors, estimates distance from a
//! monocular depth map and fuses everything into one translated, per-frame
//! description.

pub mod config;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod scene;
pub mod translation;
#[cfg(feature = "onnx")]
mod utils;

pub use config::{DepthCalibration, PipelineConfig};
pub use descriptors::{DescriptorStore, Enroller, FeatureMatcher, MatchOutcome};
pub use error::{PerceptionError, Result};
pub use frame::{decode_frame, decode_image_bytes, Frame, Region};
pub use pipeline::{FrameStatus, FusedFrameResult, FusionPipeline};
pub use processing::{DepthEstimate, Detection, Position};
pub use translation::{GoogleTranslator, TranslationCache, Translator};
