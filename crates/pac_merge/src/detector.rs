//! Conflict detection across contributing mods.
//!
//! Every contributing mod may ship replacement archives in its redirect folder.
//! An archive that only one mod replaces needs no merging: the redirection layer
//! serves that mod's copy directly. Only names that appear in two or more mods
//! form a [`MergeSet`].

use crate::config::MergeLayout;
use crate::digest::{hash_file, FileDigest};
use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Archive name -> contributing archive paths, in contributing-mod order.
pub type ArchiveGroups = BTreeMap<String, Vec<Utf8PathBuf>>;

/// All contributing copies of one archive name.
#[derive(Debug, Clone)]
pub struct MergeSet {
    /// On-disk (obfuscated) file name shared by every contributing copy.
    pub archive_name: String,
    /// One digest per contributing copy, in contributing-mod order. Each
    /// digest's `path` is the copy's source file.
    pub contributing: Vec<FileDigest>,
}

impl MergeSet {
    /// Hash every contributing path.
    pub fn build(archive_name: impl Into<String>, paths: &[Utf8PathBuf]) -> Result<Self> {
        let contributing = paths
            .par_iter()
            .map(|p| hash_file(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            archive_name: archive_name.into(),
            contributing,
        })
    }
}

/// Group the files in each mod's redirect folder by file name and keep the
/// names shared by more than one mod.
///
/// `mod_dirs` is in priority order. Mods without a redirect folder are skipped.
pub fn find_merge_sets(mod_dirs: &[Utf8PathBuf], layout: &MergeLayout) -> Result<ArchiveGroups> {
    let mut groups = ArchiveGroups::new();

    for mod_dir in mod_dirs {
        let redirect_dir = layout.mod_redirect_dir(mod_dir);
        if !redirect_dir.is_dir() {
            tracing::debug!("No redirect folder in {}, skipping", mod_dir);
            continue;
        }

        for path in list_redirected_files(&redirect_dir)? {
            let Some(name) = path.file_name() else {
                continue;
            };
            groups.entry(name.to_string()).or_default().push(path);
        }
    }

    groups.retain(|name, paths| {
        let conflicting = paths.len() > 1;
        if conflicting {
            tracing::debug!("Archive {} is replaced by {} mods", name, paths.len());
        }
        conflicting
    });

    tracing::info!("Found {} archive(s) replaced by more than one mod", groups.len());
    Ok(groups)
}

/// Hash every group into a [`MergeSet`].
pub fn build_merge_sets(groups: &ArchiveGroups) -> Result<Vec<MergeSet>> {
    groups
        .iter()
        .map(|(name, paths)| MergeSet::build(name.clone(), paths))
        .collect()
}

/// Files directly under `dir`, sorted by name. Sub-directories are ignored.
fn list_redirected_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir.as_std_path())? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(Error::NonUtf8Path)?;
        files.push(path);
    }
    files.sort();
    Ok(files)
}
