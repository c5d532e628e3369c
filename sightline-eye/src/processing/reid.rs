//! Person re-identification stage
//!
//! Relabels `person` detections with an enrolled identity when the person's
//! crop matches a stored descriptor set. Never fails the frame.

use crate::descriptors::{DescriptorStore, FeatureMatcher};
use crate::frame::Frame;
use crate::models::{FaceLocator, FeatureExtractor};
use crate::processing::detection::Detection;
use image::{imageops, DynamicImage};
use std::sync::Arc;
use tracing::debug;

const PERSON_LABEL: &str = "person";

pub struct ReIdentificationStage {
    extractor: Arc<dyn FeatureExtractor>,
    face_locator: Option<Arc<dyn FaceLocator>>,
    store: Arc<DescriptorStore>,
    matcher: FeatureMatcher,
    confidence_threshold: f32,
    min_matches: usize,
}

impl ReIdentificationStage {
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        store: Arc<DescriptorStore>,
        matcher: FeatureMatcher,
        confidence_threshold: f32,
        min_matches: usize,
    ) -> Self {
        Self {
            extractor,
            face_locator: None,
            store,
            matcher,
            confidence_threshold,
            min_matches,
        }
    }

    pub fn with_face_locator(mut self, locator: Arc<dyn FaceLocator>) -> Self {
        self.face_locator = Some(locator);
        self
    }

    /// Relabel matching person detections in place. Returns how many were
    /// identified.
    pub fn identify(&self, frame: &Frame, detections: &mut [Detection]) -> usize {
        let index = self.store.snapshot();
        if index.is_empty() {
            return 0;
        }

        let mut identified = 0;
        for detection in detections.iter_mut() {
            if detection.label != PERSON_LABEL || detection.confidence <= self.confidence_threshold {
                continue;
            }

            let Some(crop) = frame.crop(detection.bbox.region()) else {
                continue;
            };
            let subject = match self.face_locator.as_ref().and_then(|l| l.locate(&crop)) {
                Some(face) if !face.is_empty() => {
                    imageops::crop_imm(&crop, face.x1, face.y1, face.width(), face.height()).to_image()
                }
                _ => crop,
            };

            let gray = DynamicImage::ImageRgb8(subject).to_luma8();
            let features = match self.extractor.extract(&gray) {
                Ok(features) if !features.is_empty() => features,
                Ok(_) => {
                    debug!("No descriptors in person crop {:?}", detection.bbox);
                    continue;
                }
                Err(e) => {
                    debug!("Feature extraction skipped: {}", e);
                    continue;
                }
            };

            let outcome = self.matcher.best_match(&features.descriptors, &index, self.min_matches);
            if let Some(name) = outcome.person_name {
                debug!("Identified '{}' with {} matches", name, outcome.match_count);
                detection.label = name;
                detection.match_count = Some(outcome.match_count);
                identified += 1;
            }
        }
        identified
    }
}
