//! Persistent, content-addressed cache of unpacked archive contents.
//!
//! Unpacking and hashing an archive is the most expensive step of a merge. The
//! [`UnpackCache`] remembers, for every archive it has unpacked, the outer hash
//! of the archive and the hash of every member inside it. When the same content
//! shows up again it answers from memory and no codec work happens.
//!
//! # Concurrency
//!
//! Lookups take a read lock. Each source path additionally has its own mutex
//! held for the whole lookup-or-unpack, so two workers never unpack the same
//! source archive at the same time or create two entries for it.
//!
//! # Commit
//!
//! Entries created during a run are kept in a pending list. They are visible to
//! lookups immediately but only become part of the persisted cache when
//! [`commit`](UnpackCache::commit) is called after the whole run succeeded.

use crate::digest::FileDigest;
use crate::error::{Error, Result};
use crate::utils::{write_atomic, KeyedLocks};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

const CACHE_VERSION: u32 = 1;

/// Logical member path -> member digest. Digest paths are relative to the unpack root.
pub type MemberDigests = BTreeMap<String, FileDigest>;

/// What was inside an archive the last time it was unpacked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveContents {
    /// Source archive path and its outer hash.
    pub source: FileDigest,
    /// Every member found after unpacking.
    pub members: MemberDigests,
}

/// How a lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// An entry with the same outer hash existed; nothing was unpacked.
    Hit,
    /// The source path was known with a different hash; the entry was updated in place.
    Refreshed,
    /// The source path was unknown; a new pending entry was created.
    Inserted,
}

/// Result of [`UnpackCache::get_or_unpack`].
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub members: MemberDigests,
    pub status: CacheStatus,
}

/// Entry counts for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub committed: usize,
    pub pending: usize,
    pub members: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<ArchiveContents>,
}

/// Thread-safe unpack cache shared by all merge workers.
#[derive(Debug, Default)]
pub struct UnpackCache {
    committed: RwLock<Vec<ArchiveContents>>,
    pending: RwLock<Vec<ArchiveContents>>,
    source_locks: KeyedLocks<Utf8PathBuf>,
}

impl UnpackCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ArchiveContents>) -> Self {
        Self {
            committed: RwLock::new(entries),
            ..Default::default()
        }
    }

    /// Load the cache from disk.
    ///
    /// A missing file yields an empty cache. A file that cannot be decoded is
    /// logged and also yields an empty cache; the cache only saves time.
    pub fn load(path: &Utf8Path) -> Self {
        match Self::try_load(path) {
            Ok(Some(entries)) => {
                tracing::info!("Loaded unpack cache with {} entries", entries.len());
                Self::from_entries(entries)
            }
            Ok(None) => Self::new(),
            Err(e) => {
                tracing::warn!("Ignoring unpack cache at {}: {}", path, e);
                Self::new()
            }
        }
    }

    /// Load the cache, reporting a corrupt file as [`Error::CacheCorrupt`].
    pub fn try_load(path: &Utf8Path) -> Result<Option<Vec<ArchiveContents>>> {
        let bytes = match std::fs::read(path.as_std_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: CacheFile =
            rmp_serde::from_slice(&bytes).map_err(|e| Error::CacheCorrupt(e.to_string()))?;
        if file.version != CACHE_VERSION {
            return Err(Error::CacheCorrupt(format!(
                "unsupported cache version {}",
                file.version
            )));
        }
        Ok(Some(file.entries))
    }

    /// Persist the committed entries. Pending entries are not written.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let committed = self.read_committed();
        let file = CacheFile {
            version: CACHE_VERSION,
            entries: committed.clone(),
        };
        drop(committed);

        let bytes = rmp_serde::to_vec_named(&file)?;
        write_atomic(path, &bytes)?;
        tracing::debug!("Saved unpack cache with {} entries to {}", file.entries.len(), path);
        Ok(())
    }

    /// Return the members of `archive`, unpacking it with `unpack` only when
    /// no entry with the same outer hash exists.
    pub fn get_or_unpack<F>(&self, archive: &FileDigest, unpack: F) -> Result<CacheLookup>
    where
        F: FnOnce() -> Result<MemberDigests>,
    {
        let source_lock = self.source_locks.get(&archive.path);
        let _guard = source_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(members) = self.find_by_hash(archive) {
            tracing::debug!("Unpack cache hit for {} ({})", archive.path, archive.hash);
            return Ok(CacheLookup {
                members,
                status: CacheStatus::Hit,
            });
        }

        let members = unpack()?;

        for mut entries in [self.write_committed(), self.write_pending()] {
            if let Some(entry) = entries.iter_mut().find(|e| e.source.path == archive.path) {
                tracing::debug!(
                    "Unpack cache refreshed for {} ({} -> {})",
                    archive.path,
                    entry.source.hash,
                    archive.hash
                );
                entry.source.hash = archive.hash.clone();
                entry.members = members.clone();
                return Ok(CacheLookup {
                    members,
                    status: CacheStatus::Refreshed,
                });
            }
        }

        tracing::debug!("Unpack cache insert for {} ({})", archive.path, archive.hash);
        self.write_pending().push(ArchiveContents {
            source: archive.clone(),
            members: members.clone(),
        });
        Ok(CacheLookup {
            members,
            status: CacheStatus::Inserted,
        })
    }

    /// Look up members by outer hash only, without unpacking.
    pub fn find_by_hash(&self, archive: &FileDigest) -> Option<MemberDigests> {
        let find = |entries: &[ArchiveContents]| {
            entries
                .iter()
                .find(|e| e.source.content_equals(archive))
                .map(|e| e.members.clone())
        };
        find(&self.read_committed()).or_else(|| find(&self.read_pending()))
    }

    /// Move pending entries into the committed set. Returns how many were moved.
    pub fn commit(&self) -> usize {
        // Lock order is always committed, then pending
        let mut committed = self.write_committed();
        let mut pending = self.write_pending();
        let count = pending.len();
        committed.append(&mut pending);
        count
    }

    /// Drop entries created during a run that did not succeed.
    pub fn discard_pending(&self) -> usize {
        let mut pending = self.write_pending();
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn stats(&self) -> CacheStats {
        let committed = self.read_committed();
        let pending = self.read_pending();
        CacheStats {
            committed: committed.len(),
            pending: pending.len(),
            members: committed
                .iter()
                .chain(pending.iter())
                .map(|e| e.members.len())
                .sum(),
        }
    }

    /// Upper-case outer hashes of every committed entry.
    pub fn committed_hashes(&self) -> BTreeSet<String> {
        self.read_committed()
            .iter()
            .map(|e| e.source.hash.to_ascii_uppercase())
            .collect()
    }

    /// Snapshot of the committed entries.
    pub fn entries(&self) -> Vec<ArchiveContents> {
        self.read_committed().clone()
    }

    fn read_committed(&self) -> RwLockReadGuard<'_, Vec<ArchiveContents>> {
        self.committed.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_committed(&self) -> RwLockWriteGuard<'_, Vec<ArchiveContents>> {
        self.committed.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_pending(&self) -> RwLockReadGuard<'_, Vec<ArchiveContents>> {
        self.pending.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_pending(&self) -> RwLockWriteGuard<'_, Vec<ArchiveContents>> {
        self.pending.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn members(pairs: &[(&str, &str)]) -> MemberDigests {
        pairs
            .iter()
            .map(|(k, h)| (k.to_string(), FileDigest::new(*k, *h)))
            .collect()
    }

    #[test]
    fn test_insert_then_hit_without_unpack() {
        let cache = UnpackCache::new();
        let archive = FileDigest::new("/mods/a/Redirector/KEY", "AAAA");
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_unpack(&archive, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(members(&[("data/x.bin", "11")]))
            })
            .unwrap();
        assert_eq!(first.status, CacheStatus::Inserted);

        let second = cache
            .get_or_unpack(&archive, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(MemberDigests::new())
            })
            .unwrap();
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.members.len(), 1);
        assert_eq!(second.members["data/x.bin"].hash, "11");
    }

    #[test]
    fn test_hit_by_hash_from_other_path() {
        let cache = UnpackCache::from_entries(vec![ArchiveContents {
            source: FileDigest::new("/mods/a/Redirector/KEY", "AAAA"),
            members: members(&[("data/x.bin", "11")]),
        }]);
        let copy = FileDigest::new("/mods/b/Redirector/KEY", "aaaa");

        let lookup = cache
            .get_or_unpack(&copy, || panic!("must not unpack"))
            .unwrap();
        assert_eq!(lookup.status, CacheStatus::Hit);
    }

    #[test]
    fn test_changed_hash_refreshes_in_place() {
        let cache = UnpackCache::from_entries(vec![ArchiveContents {
            source: FileDigest::new("/mods/a/Redirector/KEY", "AAAA"),
            members: members(&[("data/x.bin", "11")]),
        }]);
        let edited = FileDigest::new("/mods/a/Redirector/KEY", "BBBB");
        let calls = AtomicUsize::new(0);

        let lookup = cache
            .get_or_unpack(&edited, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(members(&[("data/x.bin", "22")]))
            })
            .unwrap();

        assert_eq!(lookup.status, CacheStatus::Refreshed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.pending, 0);

        let entries = cache.entries();
        assert_eq!(entries[0].source.hash, "BBBB");
        assert_eq!(entries[0].members["data/x.bin"].hash, "22");
    }

    #[test]
    fn test_unpack_error_leaves_cache_untouched() {
        let cache = UnpackCache::new();
        let archive = FileDigest::new("/mods/a/Redirector/KEY", "AAAA");

        let result = cache.get_or_unpack(&archive, || Err(Error::Other("boom".into())));
        assert!(result.is_err());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_commit_and_discard() {
        let cache = UnpackCache::new();
        for (path, hash) in [("/a", "01"), ("/b", "02")] {
            cache
                .get_or_unpack(&FileDigest::new(path, hash), || Ok(MemberDigests::new()))
                .unwrap();
        }
        assert_eq!(cache.stats().pending, 2);
        assert_eq!(cache.commit(), 2);
        assert_eq!(cache.stats().committed, 2);

        cache
            .get_or_unpack(&FileDigest::new("/c", "03"), || Ok(MemberDigests::new()))
            .unwrap();
        assert_eq!(cache.discard_pending(), 1);
        assert_eq!(cache.stats().committed, 2);
        assert_eq!(cache.stats().pending, 0);
        assert_eq!(
            cache.committed_hashes().into_iter().collect::<Vec<_>>(),
            vec!["01", "02"]
        );
    }

    #[test]
    fn test_concurrent_same_source_unpacks_once() {
        let cache = Arc::new(UnpackCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let archive = FileDigest::new("/mods/a/Redirector/KEY", "AAAA");

        let handles = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let archive = archive.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_unpack(&archive, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(members(&[("data/x.bin", "11")]))
                        })
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().pending, 1);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("cache.msgpack")).unwrap();

        let cache = UnpackCache::new();
        cache
            .get_or_unpack(&FileDigest::new("/mods/a/KEY", "AAAA"), || {
                Ok(members(&[("data/x.bin", "11"), ("data/y.bin", "22")]))
            })
            .unwrap();
        cache.commit();
        cache.save(&path).unwrap();

        let loaded = UnpackCache::load(&path);
        let entries = loaded.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source.path, Utf8PathBuf::from("/mods/a/KEY"));
        assert_eq!(entries[0].source.hash, "AAAA");
        assert_eq!(entries[0].members["data/y.bin"].path, Utf8PathBuf::from("data/y.bin"));
        assert_eq!(entries[0].members["data/y.bin"].hash, "22");
    }

    #[test]
    fn test_pending_entries_are_not_saved() {
        let dir = tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("cache.msgpack")).unwrap();

        let cache = UnpackCache::new();
        cache
            .get_or_unpack(&FileDigest::new("/a", "01"), || Ok(MemberDigests::new()))
            .unwrap();
        cache.save(&path).unwrap();

        assert!(UnpackCache::load(&path).entries().is_empty());
    }

    #[test]
    fn test_corrupt_cache_loads_empty() {
        let dir = tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("cache.msgpack")).unwrap();
        std::fs::write(&path, b"\xc1 definitely not msgpack").unwrap();

        assert!(matches!(
            UnpackCache::try_load(&path),
            Err(Error::CacheCorrupt(_))
        ));
        assert_eq!(UnpackCache::load(&path).stats(), CacheStats::default());
    }

    #[test]
    fn test_missing_cache_loads_empty() {
        let dir = tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("none.msgpack")).unwrap();
        assert!(UnpackCache::try_load(&path).unwrap().is_none());
    }
}
