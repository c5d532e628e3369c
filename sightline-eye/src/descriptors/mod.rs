//! Enrolled identity descriptors: persistence, indexing and matching

pub mod enroll;
pub mod matcher;
pub mod store;

pub use enroll::{EnrolledImage, Enroller, EnrollmentReport, VariationSummary};
pub use matcher::{hamming_distance, FeatureMatcher, MatchOutcome};
pub use store::{DescriptorIndex, DescriptorStore, DescriptorVariation, IdentityDescriptorSet};
