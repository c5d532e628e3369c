//! Identity enrollment
//!
//! Turns a batch of labelled images into persisted descriptor sets. The
//! person name is the filename prefix before the first `_`, so
//! `alice_front.jpg` and `alice_side.png` both enroll `alice`.

use crate::descriptors::store::{DescriptorStore, DescriptorVariation, IdentityDescriptorSet};
use crate::error::Result;
use crate::frame::decode_image_bytes;
use crate::models::{FaceLocator, FeatureExtractor};
use image::{imageops, DynamicImage, RgbImage};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One uploaded image
#[derive(Debug, Clone)]
pub struct EnrolledImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariationSummary {
    pub variation: String,
    pub num_keypoints: usize,
}

/// Per-image enrollment result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentReport {
    pub filename: String,
    pub person_name: String,
    pub variations: Vec<VariationSummary>,
}

pub struct Enroller {
    extractor: Arc<dyn FeatureExtractor>,
    face_locator: Option<Arc<dyn FaceLocator>>,
    store: Arc<DescriptorStore>,
}

impl Enroller {
    pub fn new(extractor: Arc<dyn FeatureExtractor>, store: Arc<DescriptorStore>) -> Self {
        Self {
            extractor,
            face_locator: None,
            store,
        }
    }

    pub fn with_face_locator(mut self, locator: Arc<dyn FaceLocator>) -> Self {
        self.face_locator = Some(locator);
        self
    }

    /// `dir/alice_front.jpg` -> `(alice, alice_front)`
    pub fn person_name_from_filename(filename: &str) -> Option<(String, String)> {
        let path = Path::new(filename);
        let stem = path.file_stem()?.to_str()?.trim().to_string();
        let name = stem.split('_').next()?.trim().to_string();
        if name.is_empty() {
            return None;
        }
        Some((name, stem))
    }

    /// Extract descriptors from the five orientation variants of an image.
    /// Variants yielding no descriptors are left out.
    pub fn describe_variants(&self, image: &RgbImage) -> Result<Vec<DescriptorVariation>> {
        let subject = match self.face_locator.as_ref().and_then(|l| l.locate(image)) {
            Some(face) if !face.is_empty() => {
                debug!("Face region {:?} used for enrollment", face);
                imageops::crop_imm(image, face.x1, face.y1, face.width(), face.height()).to_image()
            }
            _ => image.clone(),
        };

        let gray = DynamicImage::ImageRgb8(subject).to_luma8();
        let variants = [
            ("original", gray.clone()),
            ("grayscale", imageops::grayscale(&gray)),
            ("rotation_90", imageops::rotate90(&gray)),
            ("rotation_180", imageops::rotate180(&gray)),
            ("rotation_270", imageops::rotate270(&gray)),
        ];

        let mut variations = Vec::new();
        for (label, variant) in variants {
            let features = self.extractor.extract(&variant)?;
            debug!("Variant {}: {} keypoints", label, features.keypoints.len());
            if features.is_empty() {
                continue;
            }
            variations.push(DescriptorVariation {
                variation: label.to_string(),
                descriptors: features.descriptors,
                keypoints: features.keypoints,
            });
        }
        Ok(variations)
    }

    /// Enroll a batch, persist one descriptor set per person and reload the
    /// store. Failures are per image (undecodable, unnamed, extraction error)
    /// or per person (save error); the rest of the batch still goes through
    /// and failed entries are left out of the reports.
    pub fn enroll(&self, images: Vec<EnrolledImage>) -> Vec<EnrollmentReport> {
        let mut reports = Vec::new();
        let mut per_person: BTreeMap<String, Vec<(String, Vec<DescriptorVariation>)>> = BTreeMap::new();

        for upload in images {
            let Some((person_name, stem)) = Self::person_name_from_filename(&upload.filename) else {
                warn!("Cannot derive a person name from '{}', skipping", upload.filename);
                continue;
            };

            let frame = match decode_image_bytes(&upload.bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Skipping '{}': {}", upload.filename, e);
                    continue;
                }
            };

            let variations = match self.describe_variants(frame.image()) {
                Ok(variations) => variations,
                Err(e) => {
                    warn!("Feature extraction failed for '{}': {}", upload.filename, e);
                    continue;
                }
            };
            reports.push(EnrollmentReport {
                filename: upload.filename.clone(),
                person_name: person_name.clone(),
                variations: variations
                    .iter()
                    .map(|v| VariationSummary {
                        variation: v.variation.clone(),
                        num_keypoints: v.keypoints.len(),
                    })
                    .collect(),
            });

            if variations.is_empty() {
                warn!("No descriptors extracted from '{}'", upload.filename);
                continue;
            }
            per_person.entry(person_name).or_default().push((stem, variations));
        }

        let mut saved = 0;
        let mut failed = BTreeSet::new();
        for (person_name, images) in per_person {
            let merged = images.len() > 1;
            let variations = images
                .into_iter()
                .flat_map(|(stem, variations)| {
                    variations.into_iter().map(move |mut v| {
                        if merged {
                            v.variation = format!("{}:{}", stem, v.variation);
                        }
                        v
                    })
                })
                .collect();

            let set = IdentityDescriptorSet { person_name, variations };
            match self.store.save(&set) {
                Ok(_) => saved += 1,
                Err(e) => {
                    warn!("Failed to save descriptors for '{}': {}", set.person_name, e);
                    failed.insert(set.person_name);
                }
            }
        }

        if saved > 0 {
            self.store.load();
        }
        reports.retain(|r| !failed.contains(&r.person_name));
        info!(
            "Enrollment batch done: {} images reported, {} identities saved, {} failed",
            reports.len(),
            saved,
            failed.len()
        );
        reports
    }
}
