//! Oriented FAST + rotated BRIEF feature extractor
//!
//! Produces 256-bit (32 byte) binary descriptors comparable with Hamming
//! distance. Used both when enrolling identities and when re-identifying
//! people in live frames, so the two sides always share one sampling pattern.

use crate::error::Result;
use crate::models::{Descriptor, FeatureExtractor, Keypoint, LocalFeatures};
use image::GrayImage;
use std::sync::OnceLock;
use tracing::trace;

/// Bresenham circle of radius 3 used by the FAST test
const FAST_CIRCLE: [(i32, i32); 16] = [
    (0, -3), (1, -3), (2, -2), (3, -1), (3, 0), (3, 1), (2, 2), (1, 3),
    (0, 3), (-1, 3), (-2, 2), (-3, 1), (-3, 0), (-3, -1), (-2, -2), (-1, -3),
];
const FAST_ARC: usize = 9;

/// Radius of the patch used for the intensity centroid
const ORIENTATION_RADIUS: i32 = 15;
/// Sampling pairs stay inside this radius so rotation never leaves the patch
const PATTERN_RADIUS: i32 = 13;
const EDGE: i32 = ORIENTATION_RADIUS + 1;
const DESCRIPTOR_BITS: usize = 256;
pub const DESCRIPTOR_BYTES: usize = DESCRIPTOR_BITS / 8;
const KEYPOINT_SIZE: f32 = 31.0;

type SamplePair = ((i32, i32), (i32, i32));

fn sampling_pattern() -> &'static [SamplePair] {
    static PATTERN: OnceLock<Vec<SamplePair>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // xorshift with a fixed seed keeps the pattern stable across processes
        let mut state: u32 = 0x9E37_79B9;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        let span = (2 * PATTERN_RADIUS + 1) as u32;
        let mut point = move || loop {
            let x = (next() % span) as i32 - PATTERN_RADIUS;
            let y = (next() % span) as i32 - PATTERN_RADIUS;
            if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
                return (x, y);
            }
        };
        (0..DESCRIPTOR_BITS).map(|_| (point(), point())).collect()
    })
}

/// ORB-style extractor
#[derive(Debug, Clone)]
pub struct BriefExtractor {
    max_features: usize,
    fast_threshold: u8,
    blur_sigma: f32,
}

impl Default for BriefExtractor {
    fn default() -> Self {
        Self {
            max_features: 1000,
            fast_threshold: 20,
            blur_sigma: 1.2,
        }
    }
}

impl BriefExtractor {
    pub fn new(max_features: usize, fast_threshold: u8) -> Self {
        Self {
            max_features: max_features.max(1),
            fast_threshold,
            ..Self::default()
        }
    }

    /// FAST-9 score, or `None` if `(x, y)` is not a corner
    fn fast_score(&self, image: &GrayImage, x: i32, y: i32) -> Option<u32> {
        let center = image.get_pixel(x as u32, y as u32)[0] as i32;
        let threshold = self.fast_threshold as i32;

        let mut diffs = [0i32; 16];
        for (i, (dx, dy)) in FAST_CIRCLE.iter().enumerate() {
            diffs[i] = image.get_pixel((x + dx) as u32, (y + dy) as u32)[0] as i32 - center;
        }

        let has_arc = |brighter: bool| {
            let mut run = 0;
            // Walk the circle twice to catch arcs that wrap around
            for i in 0..32 {
                let d = diffs[i % 16];
                let hit = if brighter { d > threshold } else { d < -threshold };
                if hit {
                    run += 1;
                    if run >= FAST_ARC {
                        return true;
                    }
                } else {
                    run = 0;
                }
            }
            false
        };

        let brighter = has_arc(true);
        let darker = !brighter && has_arc(false);
        if !brighter && !darker {
            return None;
        }

        let score = diffs
            .iter()
            .filter(|d| if brighter { **d > threshold } else { **d < -threshold })
            .map(|d| (d.abs() - threshold) as u32)
            .sum();
        Some(score)
    }

    fn detect_corners(&self, image: &GrayImage) -> Vec<(i32, i32, u32)> {
        let (w, h) = (image.width() as i32, image.height() as i32);
        let mut scores = vec![0u32; (w * h) as usize];
        for y in EDGE..h - EDGE {
            for x in EDGE..w - EDGE {
                if let Some(score) = self.fast_score(image, x, y) {
                    scores[(y * w + x) as usize] = score;
                }
            }
        }

        // 3x3 non-maximum suppression
        let mut corners = Vec::new();
        for y in EDGE..h - EDGE {
            for x in EDGE..w - EDGE {
                let score = scores[(y * w + x) as usize];
                if score == 0 {
                    continue;
                }
                let is_max = (-1..=1).all(|dy| {
                    (-1..=1).all(|dx| {
                        (dx == 0 && dy == 0) || scores[((y + dy) * w + x + dx) as usize] <= score
                    })
                });
                if is_max {
                    corners.push((x, y, score));
                }
            }
        }

        // Strongest first; ties by raster order keep the output deterministic
        corners.sort_by(|a, b| b.2.cmp(&a.2).then(a.1.cmp(&b.1)).then(a.0.cmp(&b.0)));
        corners.truncate(self.max_features);
        corners
    }

    /// Intensity-centroid orientation in radians
    fn orientation(image: &GrayImage, x: i32, y: i32) -> f32 {
        let (mut m01, mut m10) = (0i64, 0i64);
        let r2 = ORIENTATION_RADIUS * ORIENTATION_RADIUS;
        for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
                if dx * dx + dy * dy > r2 {
                    continue;
                }
                let v = image.get_pixel((x + dx) as u32, (y + dy) as u32)[0] as i64;
                m10 += dx as i64 * v;
                m01 += dy as i64 * v;
            }
        }
        (m01 as f32).atan2(m10 as f32)
    }

    fn describe(smoothed: &GrayImage, x: i32, y: i32, angle: f32) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let sample = |(px, py): (i32, i32)| {
            let rx = (cos * px as f32 - sin * py as f32).round() as i32;
            let ry = (sin * px as f32 + cos * py as f32).round() as i32;
            smoothed.get_pixel((x + rx) as u32, (y + ry) as u32)[0]
        };

        let mut descriptor = vec![0u8; DESCRIPTOR_BYTES];
        for (bit, (p, q)) in sampling_pattern().iter().enumerate() {
            if sample(*p) < sample(*q) {
                descriptor[bit / 8] |= 1 << (bit % 8);
            }
        }
        descriptor
    }
}

impl FeatureExtractor for BriefExtractor {
    fn name(&self) -> &'static str {
        "orb-brief"
    }

    fn extract(&self, image: &GrayImage) -> Result<LocalFeatures> {
        let (w, h) = image.dimensions();
        if w <= 2 * EDGE as u32 || h <= 2 * EDGE as u32 {
            trace!("Image {}x{} too small for feature extraction", w, h);
            return Ok(LocalFeatures::default());
        }

        let corners = self.detect_corners(image);
        let smoothed = image::imageops::blur(image, self.blur_sigma);

        let mut features = LocalFeatures::default();
        for (x, y, _) in corners {
            let angle = Self::orientation(image, x, y);
            features.descriptors.push(Self::describe(&smoothed, x, y, angle));
            features.keypoints.push(Keypoint {
                x: x as f32,
                y: y as f32,
                size: KEYPOINT_SIZE,
                angle: angle.to_degrees().rem_euclid(360.0),
            });
        }

        trace!("Extracted {} features from {}x{} image", features.descriptors.len(), w, h);
        Ok(features)
    }
}
