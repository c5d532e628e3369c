//! Brute-force Hamming matcher with mutual nearest-neighbour cross-check
//!
//! Cost is O(identities x variations x |query| x |stored|), which dominates
//! frame latency once a few people are enrolled.

use crate::descriptors::store::DescriptorIndex;
use crate::models::Descriptor;
use tracing::trace;

/// Best identity for a query descriptor set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    pub person_name: Option<String>,
    pub match_count: usize,
}

impl MatchOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_match(&self) -> bool {
        self.person_name.is_some()
    }
}

/// Number of differing bits. Descriptors of different lengths are never
/// comparable.
pub fn hamming_distance(a: &[u8], b: &[u8]) -> Option<u32> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum())
}

#[derive(Debug, Clone)]
pub struct FeatureMatcher {
    max_distance: u32,
}

impl Default for FeatureMatcher {
    fn default() -> Self {
        Self::new(50)
    }
}

impl FeatureMatcher {
    pub fn new(max_distance: u32) -> Self {
        Self { max_distance }
    }

    /// Count cross-checked correspondences with distance `<= max_distance`.
    ///
    /// Nearest neighbours are computed in both directions during one pass;
    /// ties resolve to the lowest index.
    pub fn good_matches(&self, query: &[Descriptor], stored: &[Descriptor]) -> usize {
        if query.is_empty() || stored.is_empty() {
            return 0;
        }

        let mut query_best: Vec<Option<(usize, u32)>> = vec![None; query.len()];
        let mut stored_best: Vec<Option<(usize, u32)>> = vec![None; stored.len()];

        for (qi, q) in query.iter().enumerate() {
            for (si, s) in stored.iter().enumerate() {
                let Some(distance) = hamming_distance(q, s) else {
                    continue;
                };
                if query_best[qi].map_or(true, |(_, best)| distance < best) {
                    query_best[qi] = Some((si, distance));
                }
                if stored_best[si].map_or(true, |(_, best)| distance < best) {
                    stored_best[si] = Some((qi, distance));
                }
            }
        }

        query_best
            .iter()
            .enumerate()
            .filter(|(qi, best)| match best {
                Some((si, distance)) => {
                    *distance <= self.max_distance
                        && stored_best[*si].map(|(back, _)| back) == Some(*qi)
                }
                None => false,
            })
            .count()
    }

    /// Find the enrolled identity with the most good correspondences.
    ///
    /// Candidates are visited in index order (name ascending, then variation
    /// order) and only a strictly greater count replaces the current best,
    /// so equal maxima resolve to the first candidate seen.
    pub fn best_match(
        &self,
        query: &[Descriptor],
        index: &DescriptorIndex,
        min_matches: usize,
    ) -> MatchOutcome {
        if index.is_empty() || query.is_empty() {
            return MatchOutcome::none();
        }

        let threshold = min_matches.max(1);
        let mut best = MatchOutcome::none();

        for identity in index.iter() {
            for variation in &identity.variations {
                let count = self.good_matches(query, &variation.descriptors);
                trace!(
                    "'{}' / {}: {} good matches",
                    identity.person_name,
                    variation.variation,
                    count
                );
                if count >= threshold && count > best.match_count {
                    best = MatchOutcome {
                        person_name: Some(identity.person_name.clone()),
                        match_count: count,
                    };
                }
            }
        }

        best
    }
}
