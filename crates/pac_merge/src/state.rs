//! Merge snapshot persistence for run-level short-circuiting.
//!
//! After a successful run, the grouping of contributing archives that was merged
//! is serialized to `last-merge.json`. On the next run the engine compares the
//! freshly detected grouping against it; if every archive name maps to the same
//! set of content hashes, the whole merge phase is skipped.
//!
//! A run that starts merging first records its grouping as *incomplete*. Such a
//! snapshot never matches, so a run that fails or is interrupted is always
//! followed by a full merge, while its names are still known for stale-output
//! removal.
//!
//! The comparison is by content only: paths are recorded for diagnostics but a
//! mod that moved on disk without changing its archives does not force a merge.

use crate::digest::FileDigest;
use crate::error::Result;
use crate::utils::write_atomic;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const SNAPSHOT_VERSION: u32 = 1;

/// Archive name -> digests of every contributing copy.
pub type MergeGrouping = BTreeMap<String, Vec<FileDigest>>;

/// Snapshot of the grouping merged by the last successful run.
///
/// # JSON format
///
/// ```json
/// {
///   "version": 1,
///   "mergeSets": {
///     "0A1B...": [
///       { "path": "C:/Mods/a/Redirector/0A1B...", "hash": "5F3C..." },
///       { "path": "C:/Mods/b/Redirector/0A1B...", "hash": "77E0..." }
///     ]
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSnapshot {
    pub version: u32,
    /// Written before merging starts; cleared once the run succeeded.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
    pub merge_sets: MergeGrouping,
}

impl Default for MergeSnapshot {
    fn default() -> Self {
        Self::new(MergeGrouping::new())
    }
}

impl MergeSnapshot {
    pub fn new(merge_sets: MergeGrouping) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            incomplete: false,
            merge_sets,
        }
    }

    /// Snapshot of a run still in progress. It names the archives the run may
    /// publish but never matches any grouping.
    pub fn incomplete(merge_sets: MergeGrouping) -> Self {
        Self {
            incomplete: true,
            ..Self::new(merge_sets)
        }
    }

    /// Load the snapshot.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, can't be parsed, or was
    /// written by an incompatible version. A bad snapshot only costs one full
    /// merge, so it is never an error.
    pub fn load(path: &Utf8Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path.as_std_path()) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Self>(&contents) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => Ok(Some(snapshot)),
            Ok(snapshot) => {
                tracing::warn!(
                    "Ignoring merge snapshot with unsupported version {}",
                    snapshot.version
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable merge snapshot {}: {}", path, e);
                Ok(None)
            }
        }
    }

    /// Save the snapshot atomically, creating parent directories if needed.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        write_atomic(path, contents.as_bytes())
    }

    /// Whether `grouping` has exactly the same archive names, each with the same
    /// set of content hashes. An incomplete snapshot matches nothing.
    pub fn matches(&self, grouping: &MergeGrouping) -> bool {
        !self.incomplete
            && self.merge_sets.len() == grouping.len()
            && self.merge_sets.iter().all(|(name, digests)| {
                grouping
                    .get(name)
                    .is_some_and(|other| hash_set(digests) == hash_set(other))
            })
    }
}

fn hash_set(digests: &[FileDigest]) -> BTreeSet<String> {
    digests.iter().map(|d| d.hash.to_ascii_uppercase()).collect()
}
