//! Filesystem and path helpers shared by the merge pipeline.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use walkdir::WalkDir;

/// Derive the logical member path of a file inside an unpack root.
///
/// The logical path starts at the first component equal to `anchor`
/// (case-insensitive) and uses `/` separators, so `out/chr/data/x/y.bin`
/// becomes `data/x/y.bin`. Paths without an anchor component are returned
/// relative to the root unchanged.
pub fn logical_member_path(rel_path: &Utf8Path, anchor: &str) -> String {
    let parts = rel_path
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>();

    let start = parts
        .iter()
        .position(|p| p.eq_ignore_ascii_case(anchor))
        .unwrap_or(0);

    parts[start..].join("/").replace('\\', "/")
}

/// List every regular file under `root`, as paths relative to `root`, in sorted order.
pub fn list_files_relative(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root.as_std_path()).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8PathBuf::from_path_buf(entry.into_path()).map_err(Error::NonUtf8Path)?;
        let rel = path
            .strip_prefix(root)
            .map_err(|_| format!("{} is not under {}", path, root))?
            .to_path_buf();
        files.push(rel);
    }
    Ok(files)
}

/// Copy a file, creating the destination's parent directories.
pub fn copy_file_create_dirs(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent.as_std_path())?;
    }
    std::fs::copy(src.as_std_path(), dst.as_std_path())?;
    Ok(())
}

/// Copy a directory tree.
///
/// When `overwrite` is `false`, files that already exist at the destination are
/// left untouched.
pub fn copy_dir_all(src: &Utf8Path, dst: &Utf8Path, overwrite: bool) -> Result<usize> {
    if !src.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("source directory not found: {}", src),
        )));
    }

    let mut copied = 0;
    std::fs::create_dir_all(dst.as_std_path())?;
    for rel in list_files_relative(src)? {
        let target = dst.join(&rel);
        if !overwrite && target.exists() {
            continue;
        }
        copy_file_create_dirs(&src.join(&rel), &target)?;
        copied += 1;
    }
    Ok(copied)
}

/// Remove a directory tree if it exists.
pub fn remove_dir_if_exists(dir: &Utf8Path) -> Result<()> {
    match std::fs::remove_dir_all(dir.as_std_path()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove a file if it exists. Returns whether a file was removed.
pub fn remove_file_if_exists(path: &Utf8Path) -> Result<bool> {
    match std::fs::remove_file(path.as_std_path()) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Write `bytes` to `path` through a temporary sibling and a rename.
///
/// Readers never observe a half-written file.
pub fn write_atomic(path: &Utf8Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent.as_std_path())?;
    }

    let tmp = Utf8PathBuf::from(format!("{}.tmp", path));
    {
        let mut file = std::fs::File::create(tmp.as_std_path())?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
    }

    #[cfg(windows)]
    if path.exists() {
        std::fs::remove_file(path.as_std_path())?;
    }
    std::fs::rename(tmp.as_std_path(), path.as_std_path())?;
    Ok(())
}

/// A set of mutexes keyed by value, created on demand.
///
/// Two callers locking the same key are serialized; different keys never block
/// each other beyond the brief lookup of the lock itself.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get the lock for `key`. Hold the returned `Arc` and call `lock()` on it.
    pub fn get(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a mutex, ignoring poisoning.
///
/// The guarded data is either `()` or only ever mutated in single statements,
/// so a panic in another worker cannot leave it inconsistent.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
