//! Run configuration and filesystem layout.
//!
//! A [`MergeConfig`] is built once at the start of a run and passed by
//! reference into every component. Nothing in the crate reads global state.
//!
//! # Layout
//!
//! ```text
//! <mod_dir>/Redirector/<archive>          input, one folder per contributing mod
//! <work_dir>/Redirector/<archive>         publish location (merged archives)
//! <work_dir>/Merging/Original/            pristine originals (scratch, per run)
//! <work_dir>/Merging/Merged/<archive>/    member set being repacked (scratch)
//! <work_dir>/Merging/Unpacked/<hash>/     unpacked mod copies, keyed by content hash
//! <work_dir>/Merging/unpack-cache.msgpack persisted unpack cache
//! <work_dir>/Merging/last-merge.json      snapshot of the last merged grouping
//! ```

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};

/// Default folder, relative to a mod directory, whose files replace game archives.
pub const DEFAULT_REDIRECT_SUBPATH: &str = "Redirector";
/// Default extension of mergeable archives.
pub const DEFAULT_ARCHIVE_EXTENSION: &str = "pac";
/// Default path component that anchors logical member paths.
pub const DEFAULT_DATA_ANCHOR: &str = "data";

const MERGING_DIR: &str = "Merging";
const CACHE_FILE: &str = "unpack-cache.msgpack";
const SNAPSHOT_FILE: &str = "last-merge.json";

/// Filesystem locations used by a merge run.
#[derive(Debug, Clone)]
pub struct MergeLayout {
    /// Directory owned by the merger; receives scratch, state and published output.
    pub work_dir: Utf8PathBuf,
    /// Directory holding the game's pristine archives.
    pub game_data_dir: Utf8PathBuf,
    /// Folder, relative to each mod directory (and to `work_dir`), holding redirected archives.
    pub redirect_subpath: Utf8PathBuf,
}

impl MergeLayout {
    pub fn new(work_dir: Utf8PathBuf, game_data_dir: Utf8PathBuf) -> Self {
        Self {
            work_dir,
            game_data_dir,
            redirect_subpath: Utf8PathBuf::from(DEFAULT_REDIRECT_SUBPATH),
        }
    }

    pub fn with_redirect_subpath(mut self, subpath: impl Into<Utf8PathBuf>) -> Self {
        self.redirect_subpath = subpath.into();
        self
    }

    /// Input folder of a contributing mod.
    pub fn mod_redirect_dir(&self, mod_dir: &Utf8Path) -> Utf8PathBuf {
        mod_dir.join(&self.redirect_subpath)
    }

    /// Where merged archives are published.
    pub fn publish_dir(&self) -> Utf8PathBuf {
        self.work_dir.join(&self.redirect_subpath)
    }

    pub fn merging_dir(&self) -> Utf8PathBuf {
        self.work_dir.join(MERGING_DIR)
    }

    pub fn originals_dir(&self) -> Utf8PathBuf {
        self.merging_dir().join("Original")
    }

    pub fn merged_dir(&self) -> Utf8PathBuf {
        self.merging_dir().join("Merged")
    }

    pub fn unpacked_dir(&self) -> Utf8PathBuf {
        self.merging_dir().join("Unpacked")
    }

    /// Unpack root for a mod copy with the given content hash.
    pub fn unpack_root(&self, archive_hash: &str) -> Utf8PathBuf {
        self.unpacked_dir().join(archive_hash)
    }

    pub fn cache_path(&self) -> Utf8PathBuf {
        self.merging_dir().join(CACHE_FILE)
    }

    pub fn snapshot_path(&self) -> Utf8PathBuf {
        self.merging_dir().join(SNAPSHOT_FILE)
    }

    /// Pristine game copy of an archive.
    pub fn original_archive(&self, archive_name: &str) -> Utf8PathBuf {
        self.game_data_dir.join(archive_name)
    }

    /// Create every scratch and output directory.
    ///
    /// Failure here is fatal to the run.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.publish_dir(),
            self.originals_dir(),
            self.merged_dir(),
            self.unpacked_dir(),
        ] {
            std::fs::create_dir_all(dir.as_std_path()).map_err(|source| {
                Error::ScratchSetup {
                    path: dir.clone(),
                    source,
                }
            })?;
        }
        Ok(())
    }
}

/// Everything a merge run needs to know, constructed once and read-only afterwards.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub layout: MergeLayout,
    /// Manifest of logical paths used to build the [`PathCatalog`](crate::catalog::PathCatalog).
    pub manifest_path: Utf8PathBuf,
    /// Extension (without dot) that marks a logical path as a mergeable archive.
    pub archive_extension: String,
    /// Path component that starts every logical member path.
    pub data_anchor: String,
    /// Worker pool size; `None` lets rayon decide.
    pub threads: Option<usize>,
}

impl MergeConfig {
    pub fn new(layout: MergeLayout, manifest_path: Utf8PathBuf) -> Self {
        Self {
            layout,
            manifest_path,
            archive_extension: DEFAULT_ARCHIVE_EXTENSION.to_string(),
            data_anchor: DEFAULT_DATA_ANCHOR.to_string(),
            threads: None,
        }
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads.filter(|&n| n > 0);
        self
    }

    pub fn with_archive_extension(mut self, extension: impl Into<String>) -> Self {
        self.archive_extension = extension.into().trim_start_matches('.').to_string();
        self
    }
}
