//! Frame fusion pipeline
//!
//! Every frame moves through
//! `Decoding -> Detecting -> ReIdentifying -> Translating -> (DepthPending | DepthSkipped) -> Aggregating -> Done`
//! and produces exactly one `FusedFrameResult`. Only a decode failure
//! short-circuits; every other stage degrades.

use crate::config::PipelineConfig;
use crate::error::{PerceptionError, Result};
use crate::frame::{decode_frame, decode_image_bytes, Frame};
use crate::models::ObjectDetector;
use crate::processing::depth::{DepthEstimate, DepthWorkerPool};
use crate::processing::detection::{Detection, DetectionStage};
use crate::processing::reid::ReIdentificationStage;
use crate::scene::{SceneSummarizer, DETECTION_ERROR, INVALID_FRAME};
use crate::translation::TranslationCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Decoding,
    Detecting,
    ReIdentifying,
    Translating,
    DepthPending,
    DepthSkipped,
    Aggregating,
    Done,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::Decoding => "decoding",
            FrameStage::Detecting => "detecting",
            FrameStage::ReIdentifying => "re-identifying",
            FrameStage::Translating => "translating",
            FrameStage::DepthPending => "depth pending",
            FrameStage::DepthSkipped => "depth skipped",
            FrameStage::Aggregating => "aggregating",
            FrameStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Success,
    Error,
}

/// One response unit per received frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedFrameResult {
    pub translated_text: String,
    pub boxes: Vec<Detection>,
    pub depth: Option<DepthEstimate>,
    pub status: FrameStatus,
}

fn enter(stage: FrameStage) {
    trace!("Frame stage: {}", stage);
}

pub struct FusionPipeline {
    detection: DetectionStage,
    reid: Option<ReIdentificationStage>,
    depth: Option<DepthWorkerPool>,
    translations: Arc<TranslationCache>,
    summarizer: SceneSummarizer,
    latest_frame: RwLock<Option<Arc<Frame>>>,
}

impl FusionPipeline {
    pub fn new(
        config: &PipelineConfig,
        detector: Arc<dyn ObjectDetector>,
        translations: Arc<TranslationCache>,
    ) -> Self {
        Self {
            detection: DetectionStage::new(detector, config.position_dead_zone, config.max_detections),
            reid: None,
            depth: None,
            translations,
            summarizer: SceneSummarizer::new(config.describe_positions),
            latest_frame: RwLock::new(None),
        }
    }

    pub fn with_reidentification(mut self, stage: ReIdentificationStage) -> Self {
        self.reid = Some(stage);
        self
    }

    pub fn with_depth(mut self, pool: DepthWorkerPool) -> Self {
        self.depth = Some(pool);
        self
    }

    pub fn translations(&self) -> &Arc<TranslationCache> {
        &self.translations
    }

    pub fn has_depth(&self) -> bool {
        self.depth.is_some()
    }

    /// Process a base64 (or data URI) frame payload
    pub async fn process_payload(&self, payload: &str, target_lang: &str) -> FusedFrameResult {
        enter(FrameStage::Decoding);
        match decode_frame(payload) {
            Ok(frame) => self.process_frame(Arc::new(frame), target_lang).await,
            Err(e) => self.invalid_frame(e, target_lang).await,
        }
    }

    /// Process raw encoded image bytes
    pub async fn process_bytes(&self, bytes: &[u8], target_lang: &str) -> FusedFrameResult {
        enter(FrameStage::Decoding);
        match decode_image_bytes(bytes) {
            Ok(frame) => self.process_frame(Arc::new(frame), target_lang).await,
            Err(e) => self.invalid_frame(e, target_lang).await,
        }
    }

    async fn invalid_frame(&self, error: PerceptionError, target_lang: &str) -> FusedFrameResult {
        debug!("Frame rejected: {}", error);
        let translated_text = self.translations.translate(INVALID_FRAME, target_lang).await;
        enter(FrameStage::Done);
        FusedFrameResult {
            translated_text,
            boxes: Vec::new(),
            depth: None,
            status: FrameStatus::Error,
        }
    }

    /// Process a decoded frame
    pub async fn process_frame(&self, frame: Arc<Frame>, target_lang: &str) -> FusedFrameResult {
        *self.latest_frame.write() = Some(frame.clone());

        // Depth is independent of detection output, so it starts first
        let depth_task = self.depth.clone().map(|pool| {
            let frame = frame.clone();
            tokio::spawn(async move { pool.estimate(frame).await })
        });

        enter(FrameStage::Detecting);
        let (detections, summary) = match self.detect_and_identify(&frame) {
            Ok(detections) => {
                let summary = self.summarizer.summarize(&detections);
                (detections, summary)
            }
            Err(e) => {
                warn!("Detection error: {}", e);
                (Vec::new(), DETECTION_ERROR.to_string())
            }
        };

        enter(FrameStage::Translating);
        let depth = async {
            match depth_task {
                Some(task) => {
                    enter(FrameStage::DepthPending);
                    match task.await {
                        Ok(estimate) => estimate,
                        Err(e) => {
                            warn!("Depth task failed: {}", e);
                            None
                        }
                    }
                }
                None => {
                    enter(FrameStage::DepthSkipped);
                    None
                }
            }
        };
        let (translated_text, depth) =
            tokio::join!(self.translations.translate(&summary, target_lang), depth);

        enter(FrameStage::Aggregating);
        let result = FusedFrameResult {
            translated_text,
            boxes: detections,
            depth,
            status: FrameStatus::Success,
        };
        enter(FrameStage::Done);
        result
    }

    fn detect_and_identify(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut detections = self.detection.detect(frame)?;

        if let Some(reid) = &self.reid {
            enter(FrameStage::ReIdentifying);
            let identified = catch_unwind(AssertUnwindSafe(|| reid.identify(frame, &mut detections)))
                .map_err(|_| PerceptionError::Detection("re-identification panicked".to_string()))?;
            if identified > 0 {
                debug!("Re-identified {} people", identified);
            }
        }

        Ok(detections)
    }

    /// Run the depth stage on the most recently received frame
    pub async fn estimate_latest_depth(&self) -> Result<DepthEstimate> {
        let pool = self
            .depth
            .as_ref()
            .ok_or_else(|| PerceptionError::Depth("depth estimation unavailable".to_string()))?;
        let frame = self
            .latest_frame
            .read()
            .clone()
            .ok_or_else(|| PerceptionError::Depth("no frame captured yet".to_string()))?;

        pool.estimate(frame)
            .await
            .ok_or_else(|| PerceptionError::Depth("depth estimation failed".to_string()))
    }
}
