//! Staging of pristine game archives.
//!
//! Every merge set diffs its contributing copies against the unmodified game
//! archive. The [`OriginalsStore`] copies that archive into the originals scratch
//! directory, decrypts it and unpacks it, at most once per run. A completion
//! marker written after a successful unpack lets later merge sets reuse the
//! result; a per-archive lock stops two workers from unpacking the same original
//! concurrently.

use crate::codec::ArchiveCodec;
use crate::config::MergeLayout;
use crate::error::{Error, Result};
use crate::utils::{
    copy_file_create_dirs, list_files_relative, logical_member_path, lock_unpoisoned,
    remove_dir_if_exists, remove_file_if_exists, KeyedLocks,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;

/// Logical member path -> path relative to the unpack root.
pub type MemberIndex = BTreeMap<String, Utf8PathBuf>;

/// Pristine originals staged for the current run.
#[derive(Debug)]
pub struct OriginalsStore {
    root: Utf8PathBuf,
    layout: MergeLayout,
    locks: KeyedLocks<String>,
}

impl OriginalsStore {
    pub fn new(layout: &MergeLayout) -> Self {
        Self {
            root: layout.originals_dir(),
            layout: layout.clone(),
            locks: KeyedLocks::new(),
        }
    }

    /// Directory the original of `archive_name` is unpacked into.
    pub fn unpack_dir(&self, archive_name: &str) -> Utf8PathBuf {
        self.root.join(format!("{}.d", archive_name))
    }

    fn staged_archive(&self, archive_name: &str) -> Utf8PathBuf {
        self.root.join(archive_name)
    }

    fn marker(&self, archive_name: &str) -> Utf8PathBuf {
        self.root.join(format!("{}.done", archive_name))
    }

    /// Remove everything staged by a previous run.
    pub fn clear(&self) -> Result<()> {
        remove_dir_if_exists(&self.root)?;
        std::fs::create_dir_all(self.root.as_std_path()).map_err(|source| Error::ScratchSetup {
            path: self.root.clone(),
            source,
        })
    }

    /// Make sure the original of `archive_name` is decrypted and unpacked, and
    /// return its unpack directory.
    pub fn prepare(
        &self,
        archive_name: &str,
        codec: &dyn ArchiveCodec,
        manifest: &Utf8Path,
    ) -> Result<Utf8PathBuf> {
        let lock = self.locks.get(&archive_name.to_string());
        let _guard = lock_unpoisoned(&lock);

        let unpack_dir = self.unpack_dir(archive_name);
        if self.marker(archive_name).exists() && unpack_dir.is_dir() {
            tracing::debug!("Reusing unpacked original {}", archive_name);
            return Ok(unpack_dir);
        }

        let source = self.layout.original_archive(archive_name);
        if !source.is_file() {
            return Err(Error::OriginalMissing(source));
        }

        tracing::info!("Unpacking original {}", source);
        let staged = self.staged_archive(archive_name);
        remove_dir_if_exists(&unpack_dir)?;
        copy_file_create_dirs(&source, &staged)?;

        codec.decrypt(&staged, manifest)?;
        codec.unpack(&staged, &unpack_dir)?;

        remove_file_if_exists(&staged)?;
        std::fs::write(self.marker(archive_name).as_std_path(), b"")?;
        Ok(unpack_dir)
    }
}

/// Index every file under an unpack root by its logical member path.
pub fn index_members(unpack_dir: &Utf8Path, anchor: &str) -> Result<MemberIndex> {
    Ok(list_files_relative(unpack_dir)?
        .into_iter()
        .map(|rel| (logical_member_path(&rel, anchor), rel))
        .collect())
}
