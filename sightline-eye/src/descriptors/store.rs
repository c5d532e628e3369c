//! Descriptor store
//!
//! One JSON file per enrolled identity lives in the descriptor directory.
//! `load()` rebuilds the whole index from disk and swaps it in; readers hold
//! an `Arc` snapshot and never observe a half-built index.

use crate::error::{PerceptionError, Result};
use crate::models::{Descriptor, Keypoint};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FILE_SUFFIX: &str = "_descriptors.json";

/// Descriptors extracted from one variant of an enrollment image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorVariation {
    pub variation: String,
    pub descriptors: Vec<Descriptor>,
    #[serde(default)]
    pub keypoints: Vec<Keypoint>,
}

/// Persisted descriptor set for one identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityDescriptorSet {
    pub person_name: String,
    pub variations: Vec<DescriptorVariation>,
}

impl IdentityDescriptorSet {
    /// Checks the set can be matched against: a non-empty name, at least one
    /// variation, and a single descriptor length across the whole set.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.person_name.trim().is_empty() {
            return Err("person_name is empty".to_string());
        }
        if self.variations.is_empty() {
            return Err("no variations".to_string());
        }

        let mut lengths = self
            .variations
            .iter()
            .flat_map(|v| v.descriptors.iter().map(Vec::len));
        if let Some(first) = lengths.next() {
            if first == 0 {
                return Err("zero-length descriptor".to_string());
            }
            if lengths.any(|len| len != first) {
                return Err("descriptors have mixed lengths".to_string());
            }
        }
        Ok(())
    }

    pub fn descriptor_count(&self) -> usize {
        self.variations.iter().map(|v| v.descriptors.len()).sum()
    }
}

/// Point-in-time snapshot of every enrolled identity, ordered by name
#[derive(Debug, Clone, Default)]
pub struct DescriptorIndex {
    entries: BTreeMap<String, IdentityDescriptorSet>,
}

impl DescriptorIndex {
    pub fn from_sets(sets: impl IntoIterator<Item = IdentityDescriptorSet>) -> Self {
        Self {
            entries: sets
                .into_iter()
                .map(|set| (set.person_name.clone(), set))
                .collect(),
        }
    }

    pub fn get(&self, person_name: &str) -> Option<&IdentityDescriptorSet> {
        self.entries.get(person_name)
    }

    /// Identities in ascending name order
    pub fn iter(&self) -> impl Iterator<Item = &IdentityDescriptorSet> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Directory-backed store of identity descriptor sets
pub struct DescriptorStore {
    dir: PathBuf,
    index: RwLock<Arc<DescriptorIndex>>,
}

impl DescriptorStore {
    /// Create a store rooted at `dir`. The directory is created if missing;
    /// the index starts empty until `load()` is called.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Failed to create descriptor directory {:?}: {}", dir, e);
        }
        Self {
            dir,
            index: RwLock::new(Arc::new(DescriptorIndex::default())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescan the directory and replace the index. Returns the number of
    /// identities loaded. Bad files are skipped; an unreadable directory
    /// yields an empty index.
    pub fn load(&self) -> usize {
        let index = Arc::new(self.scan());
        let count = index.len();
        *self.index.write() = index;
        info!("Descriptor index loaded with {} identities from {:?}", count, self.dir);
        count
    }

    fn scan(&self) -> DescriptorIndex {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Failed to create descriptor directory {:?}: {}", self.dir, e);
        }

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Descriptor directory {:?} unreadable: {}", self.dir, e);
                return DescriptorIndex::default();
            }
        };

        // Sorted paths make duplicate-name resolution independent of readdir order
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(FILE_SUFFIX))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut sets = BTreeMap::new();
        for path in paths {
            match Self::read_set(&path) {
                Ok(set) => {
                    debug!(
                        "Loaded {} descriptors for '{}' from {:?}",
                        set.descriptor_count(),
                        set.person_name,
                        path
                    );
                    if sets.contains_key(&set.person_name) {
                        warn!("Duplicate descriptor set for '{}' in {:?}, keeping first", set.person_name, path);
                        continue;
                    }
                    sets.insert(set.person_name.clone(), set);
                }
                Err(e) => warn!("Skipping descriptor file {:?}: {}", path, e),
            }
        }

        DescriptorIndex { entries: sets }
    }

    fn read_set(path: &Path) -> Result<IdentityDescriptorSet> {
        let content = fs::read_to_string(path)?;
        let set: IdentityDescriptorSet = serde_json::from_str(&content)?;
        set.validate().map_err(PerceptionError::Store)?;
        Ok(set)
    }

    /// Current index snapshot
    pub fn snapshot(&self) -> Arc<DescriptorIndex> {
        self.index.read().clone()
    }

    pub fn get(&self, person_name: &str) -> Option<IdentityDescriptorSet> {
        self.snapshot().get(person_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Persist a set, replacing any previous file for the same identity.
    /// The in-memory index is untouched until the next `load()`.
    pub fn save(&self, set: &IdentityDescriptorSet) -> Result<PathBuf> {
        set.validate().map_err(PerceptionError::Store)?;
        let file_name = Self::file_name(&set.person_name)?;

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(&file_name);
        let tmp = self.dir.join(format!(".{}.tmp", file_name));
        fs::write(&tmp, serde_json::to_vec(set)?)?;
        fs::rename(&tmp, &path)?;

        info!("Saved {} descriptors for '{}' to {:?}", set.descriptor_count(), set.person_name, path);
        Ok(path)
    }

    fn file_name(person_name: &str) -> Result<String> {
        let name = person_name.trim();
        if name.is_empty()
            || name.len() > 128
            || name.starts_with('.')
            || name.chars().any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(PerceptionError::Store(format!("invalid person name '{}'", person_name)));
        }
        Ok(format!("{}{}", name, FILE_SUFFIX))
    }
}
