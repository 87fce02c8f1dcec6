//! Main merge engine implementation.
//!
//! The [`MergeEngine`] orchestrates a full merge run: conflict detection,
//! snapshot comparison, and the per-archive merge of every [`MergeSet`].
//!
//! # Run Algorithm
//!
//! 1. Create the scratch and publish directories (fatal on failure).
//! 2. Group every contributing mod's redirected archives by file name and keep
//!    the names shared by two or more mods.
//! 3. Hash every contributing copy. If the resulting grouping matches the saved
//!    [`MergeSnapshot`] by content, stop: nothing changed since the last run.
//! 4. Remove archives published by the previous run, record the new grouping as
//!    an incomplete snapshot and clear the originals scratch directory.
//! 5. Merge every set on a bounded worker pool (see below).
//! 6. If no set failed, commit new unpack-cache entries, prune unpack roots no
//!    entry refers to and save the snapshot as complete. Otherwise discard the
//!    new entries; the incomplete snapshot makes the next run merge again.
//!
//! # Per-set Algorithm
//!
//! `Detected -> OriginalUnpacked -> MembersCollected -> Compared -> {NoChangeNeeded | Repacked} -> Published`
//!
//! - Names unknown to the [`PathCatalog`] and logical paths without the archive
//!   extension are skipped before any codec work.
//! - The pristine original is staged once per run through [`OriginalsStore`].
//! - Each contributing copy resolves to its member digests via the
//!   [`UnpackCache`], unpacking only on a miss.
//! - A member is *changed* when any copy's hash differs from the original. The
//!   first differing copy in contributing order wins; later copies with other
//!   content are reported as [`MemberConflict`]s.
//! - Changed members plus the untouched original members are packed, encrypted
//!   and published under the archive's obfuscated name.
//!
//! Any error inside a set degrades that set to [`MergeOutcome::Skipped`]; sibling
//! sets and the run carry on.

use crate::cache::{MemberDigests, UnpackCache};
use crate::catalog::PathCatalog;
use crate::codec::ArchiveCodec;
use crate::config::MergeConfig;
use crate::detector::{build_merge_sets, find_merge_sets, MergeSet};
use crate::digest::{hash_file, FileDigest};
use crate::error::{Error, Result};
use crate::originals::{index_members, OriginalsStore};
use crate::state::{MergeGrouping, MergeSnapshot};
use crate::utils::{
    copy_dir_all, copy_file_create_dirs, list_files_relative, lock_unpoisoned,
    logical_member_path, remove_dir_if_exists, remove_file_if_exists, KeyedLocks,
};
use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress information emitted during a merge run.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeProgress {
    /// Current stage of the run.
    pub stage: MergeStage,
    /// Archive the stage is working on (set during `Merging`).
    pub current_file: Option<String>,
    /// 1-based index of the merge set that just finished.
    pub current: u32,
    /// Total number of merge sets.
    pub total: u32,
}

/// Stages of a merge run.
///
/// Emitted in order: `Detecting` -> `Hashing` -> `Merging` (repeated) -> `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStage {
    /// Scanning mod redirect folders for shared archive names.
    Detecting,
    /// Hashing every contributing archive copy.
    Hashing,
    /// A merge set finished.
    Merging,
    /// Run finished.
    Complete,
}

/// Progress of a single merge set, logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Detected,
    OriginalUnpacked,
    MembersCollected,
    Compared,
    NoChangeNeeded,
    Repacked,
    Published,
    Skipped,
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a merge set was not merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No catalog entry matches the archive name.
    UnrecognizedName,
    /// The catalog entry's logical path is not an archive.
    NotAnArchive { logical_path: String },
    /// The game has no pristine copy of the archive.
    OriginalMissing,
    /// The external codec failed.
    Codec(String),
    /// Filesystem or other failure while merging.
    Io(String),
}

impl SkipReason {
    /// Whether this skip means the run did not succeed. Unrecognized names and
    /// non-archives are expected noise; codec and I/O failures are not.
    pub fn is_failure(&self) -> bool {
        matches!(self, SkipReason::Codec(_) | SkipReason::Io(_))
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnrecognizedName => write!(f, "name not in path catalog"),
            SkipReason::NotAnArchive { logical_path } => {
                write!(f, "{} is not an archive", logical_path)
            }
            SkipReason::OriginalMissing => write!(f, "original archive missing"),
            SkipReason::Codec(e) => write!(f, "codec failure: {}", e),
            SkipReason::Io(e) => write!(f, "{}", e),
        }
    }
}

impl From<Error> for SkipReason {
    fn from(error: Error) -> Self {
        match error {
            Error::Codec(e) => SkipReason::Codec(e.to_string()),
            Error::OriginalMissing(_) => SkipReason::OriginalMissing,
            Error::UnrecognizedArchiveName(_) => SkipReason::UnrecognizedName,
            Error::NotAnArchive { logical_path, .. } => SkipReason::NotAnArchive { logical_path },
            other => SkipReason::Io(other.to_string()),
        }
    }
}

/// Terminal result of one merge set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A merged archive was written to the publish location.
    Published {
        output: Utf8PathBuf,
        changed_members: usize,
    },
    /// Every contributing copy matches the original; nothing was written.
    NoChangeNeeded,
    /// The set was not merged.
    Skipped(SkipReason),
}

/// Two or more mods changed the same member to different content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberConflict {
    /// Archive name of the merge set.
    pub archive: String,
    /// Logical member path.
    pub member: String,
    /// Source archive whose copy was used.
    pub winner: Utf8PathBuf,
    /// Source archives whose differing copies were dropped.
    pub overridden: Vec<Utf8PathBuf>,
}

/// Summary returned after a merge run.
#[derive(Debug, Default)]
pub struct MergeReport {
    /// The grouping matched the last snapshot and no merge work was done.
    pub short_circuited: bool,
    /// Outcome per archive name.
    pub outcomes: BTreeMap<String, MergeOutcome>,
    /// Members changed by more than one mod.
    pub conflicts: Vec<MemberConflict>,
    /// Unpack cache entries committed by this run.
    pub new_cache_entries: usize,
    /// Wall-clock time for the whole run.
    pub elapsed: Duration,
}

impl MergeReport {
    /// No merge set failed.
    pub fn succeeded(&self) -> bool {
        !self
            .outcomes
            .values()
            .any(|o| matches!(o, MergeOutcome::Skipped(reason) if reason.is_failure()))
    }

    pub fn published(&self) -> impl Iterator<Item = (&String, &Utf8PathBuf)> {
        self.outcomes.iter().filter_map(|(name, outcome)| match outcome {
            MergeOutcome::Published { output, .. } => Some((name, output)),
            _ => None,
        })
    }

    pub fn count_no_change(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, MergeOutcome::NoChangeNeeded))
            .count()
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&String, &SkipReason)> {
        self.outcomes.iter().filter_map(|(name, outcome)| match outcome {
            MergeOutcome::Skipped(reason) => Some((name, reason)),
            _ => None,
        })
    }
}

/// One detected merge set with its catalog resolution, for dry runs.
#[derive(Debug, Clone)]
pub struct PlannedMerge {
    pub archive_name: String,
    pub logical_path: Option<String>,
    pub contributors: Vec<Utf8PathBuf>,
}

struct SetResult {
    outcome: MergeOutcome,
    conflicts: Vec<MemberConflict>,
}

/// Written next to an unpack root once it is complete.
fn unpack_marker(root: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}.done", root))
}

/// A contributing copy of one member.
struct Contribution<'a> {
    source: &'a FileDigest,
    digest: FileDigest,
}

type ProgressCallback = Arc<dyn Fn(MergeProgress) + Send + Sync>;

/// Orchestrates merge runs.
///
/// Create an engine with [`new`](Self::new), optionally attach a progress
/// callback, then call [`run`](Self::run) with the contributing mod
/// directories in priority order.
pub struct MergeEngine {
    config: MergeConfig,
    catalog: PathCatalog,
    codec: Arc<dyn ArchiveCodec>,
    cache: UnpackCache,
    originals: OriginalsStore,
    unpack_locks: KeyedLocks<String>,
    force: bool,
    progress_callback: Option<ProgressCallback>,
}

impl MergeEngine {
    /// Create an engine, loading the persisted unpack cache.
    pub fn new(config: MergeConfig, catalog: PathCatalog, codec: Arc<dyn ArchiveCodec>) -> Self {
        let cache = UnpackCache::load(&config.layout.cache_path());
        Self::with_cache(config, catalog, codec, cache)
    }

    /// Create an engine around an existing cache.
    pub fn with_cache(
        config: MergeConfig,
        catalog: PathCatalog,
        codec: Arc<dyn ArchiveCodec>,
        cache: UnpackCache,
    ) -> Self {
        let originals = OriginalsStore::new(&config.layout);
        Self {
            config,
            catalog,
            codec,
            cache,
            originals,
            unpack_locks: KeyedLocks::new(),
            force: false,
            progress_callback: None,
        }
    }

    /// Register a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(MergeProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Ignore the saved snapshot and always merge.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn cache(&self) -> &UnpackCache {
        &self.cache
    }

    pub fn catalog(&self) -> &PathCatalog {
        &self.catalog
    }

    /// Detect merge sets and resolve their names without doing any merge work.
    pub fn plan(&self, mod_dirs: &[Utf8PathBuf]) -> Result<Vec<PlannedMerge>> {
        let groups = find_merge_sets(mod_dirs, &self.config.layout)?;
        Ok(groups
            .into_iter()
            .map(|(archive_name, contributors)| PlannedMerge {
                logical_path: self
                    .catalog
                    .find_archive(&archive_name)
                    .map(|e| e.logical_path.clone()),
                archive_name,
                contributors,
            })
            .collect())
    }

    /// Run a full merge. See module-level docs for the algorithm.
    pub fn run(&self, mod_dirs: &[Utf8PathBuf]) -> Result<MergeReport> {
        let start = Instant::now();
        let layout = &self.config.layout;

        tracing::info!("Merging archives...");
        tracing::info!("Work dir: {}", layout.work_dir);
        tracing::info!("Game data dir: {}", layout.game_data_dir);
        tracing::info!("Contributing mods: {}", mod_dirs.len());

        layout.ensure_dirs()?;

        self.emit_progress(MergeStage::Detecting, None, 0, 0);
        let groups = find_merge_sets(mod_dirs, layout)?;

        self.emit_progress(MergeStage::Hashing, None, 0, 0);
        let sets = build_merge_sets(&groups)?;
        let grouping: MergeGrouping = sets
            .iter()
            .map(|s| (s.archive_name.clone(), s.contributing.clone()))
            .collect();

        let snapshot_path = layout.snapshot_path();
        let previous = MergeSnapshot::load(&snapshot_path)?;
        if let Some(previous) = &previous {
            if !self.force && previous.matches(&grouping) {
                tracing::info!("Merge: contributing archives unchanged since last run, skipping");
                self.emit_progress(MergeStage::Complete, None, 0, 0);
                return Ok(MergeReport {
                    short_circuited: true,
                    elapsed: start.elapsed(),
                    ..Default::default()
                });
            }
        }

        tracing::info!("Merge: rebuilding {} merge set(s)...", sets.len());

        if let Some(previous) = &previous {
            self.remove_stale_outputs(previous)?;
        }
        MergeSnapshot::incomplete(grouping.clone()).save(&snapshot_path)?;
        self.originals.clear()?;
        remove_dir_if_exists(&layout.merged_dir())?;
        layout.ensure_dirs()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads.unwrap_or(0))
            .build()
            .map_err(|e| Error::Other(format!("Failed to build worker pool: {}", e)))?;

        let total = sets.len() as u32;
        let finished = AtomicU32::new(0);
        let results: Vec<(String, SetResult)> = pool.install(|| {
            sets.par_iter()
                .map(|set| {
                    let result = self.process_set(set);
                    let current = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    self.emit_progress(
                        MergeStage::Merging,
                        Some(set.archive_name.clone()),
                        current,
                        total,
                    );
                    (set.archive_name.clone(), result)
                })
                .collect()
        });

        let mut report = MergeReport::default();
        for (name, result) in results {
            report.conflicts.extend(result.conflicts);
            report.outcomes.insert(name, result.outcome);
        }

        if report.succeeded() {
            report.new_cache_entries = self.cache.commit();
            if let Err(e) = self.cache.save(&layout.cache_path()) {
                tracing::warn!("Failed to save unpack cache: {}", e);
            }
            match self.prune_unpack_roots() {
                Ok(0) => {}
                Ok(pruned) => tracing::debug!("Pruned {} unused unpack root(s)", pruned),
                Err(e) => tracing::warn!("Failed to prune unpack roots: {}", e),
            }
            MergeSnapshot::new(grouping).save(&snapshot_path)?;
        } else {
            let discarded = self.cache.discard_pending();
            tracing::warn!(
                "Merge: some archives failed; discarding {} new cache entries, next run merges again",
                discarded
            );
        }

        report.elapsed = start.elapsed();
        tracing::info!(
            "Merge complete: published={} unchanged={} skipped={} conflicts={} elapsed_ms={}",
            report.published().count(),
            report.count_no_change(),
            report.skipped().count(),
            report.conflicts.len(),
            report.elapsed.as_millis()
        );

        self.emit_progress(MergeStage::Complete, None, total, total);
        Ok(report)
    }

    /// Merge one set, containing every failure inside it.
    fn process_set(&self, set: &MergeSet) -> SetResult {
        let start = Instant::now();
        let name = &set.archive_name;
        tracing::info!("Processing {} ({} copies)", name, set.contributing.len());
        tracing::debug!("{}: {}", name, MergeState::Detected);

        let result = self.merge_set(set).unwrap_or_else(|e| {
            let reason = SkipReason::from(e);
            tracing::debug!("{}: failed: {}", name, reason);
            SetResult {
                outcome: MergeOutcome::Skipped(reason),
                conflicts: Vec::new(),
            }
        });

        match &result.outcome {
            MergeOutcome::Skipped(reason) => {
                tracing::debug!("{}: {} ({})", name, MergeState::Skipped, reason);
            }
            MergeOutcome::NoChangeNeeded => {
                tracing::info!(
                    "{}: no member differs from the original, elapsed_ms={}",
                    name,
                    start.elapsed().as_millis()
                );
            }
            MergeOutcome::Published {
                output,
                changed_members,
            } => {
                tracing::info!(
                    "{}: published {} changed member(s) to {}, elapsed_ms={}",
                    name,
                    changed_members,
                    output,
                    start.elapsed().as_millis()
                );
            }
        }

        result
    }

    fn merge_set(&self, set: &MergeSet) -> Result<SetResult> {
        let name = &set.archive_name;

        let entry = self
            .catalog
            .find_archive(name)
            .ok_or_else(|| Error::UnrecognizedArchiveName(name.clone()))?;
        if !entry.has_extension(&self.config.archive_extension) {
            return Err(Error::NotAnArchive {
                name: name.clone(),
                logical_path: entry.logical_path.clone(),
            });
        }
        tracing::debug!("{} resolves to {}", name, entry.logical_path);

        let original_dir =
            self.originals
                .prepare(name, self.codec.as_ref(), &self.config.manifest_path)?;
        let original_members = index_members(&original_dir, &self.config.data_anchor)?;
        tracing::debug!("{}: {}", name, MergeState::OriginalUnpacked);

        let mut collected: BTreeMap<String, Vec<Contribution<'_>>> = BTreeMap::new();
        for copy in &set.contributing {
            let lookup = self.cache.get_or_unpack(copy, || self.unpack_copy(copy))?;
            for (member, digest) in lookup.members {
                collected.entry(member).or_default().push(Contribution {
                    source: copy,
                    digest,
                });
            }
        }
        tracing::debug!(
            "{}: {} ({} distinct members)",
            name,
            MergeState::MembersCollected,
            collected.len()
        );

        let merged_dir = self.config.layout.merged_dir().join(name);
        remove_dir_if_exists(&merged_dir)?;
        std::fs::create_dir_all(merged_dir.as_std_path())?;

        let mut changed_members = 0usize;
        let mut conflicts = Vec::new();
        for (member, copies) in &collected {
            let original_rel = original_members.get(member);
            let original_hash = match original_rel {
                Some(rel) => Some(hash_file(&original_dir.join(rel))?.hash),
                None => None,
            };

            let differing = copies
                .iter()
                .filter(|c| {
                    original_hash
                        .as_deref()
                        .map_or(true, |h| !c.digest.hash.eq_ignore_ascii_case(h))
                })
                .collect::<Vec<_>>();

            let Some((winner, rest)) = differing.split_first() else {
                continue;
            };

            let overridden = rest
                .iter()
                .filter(|c| !c.digest.content_equals(&winner.digest))
                .map(|c| c.source.path.clone())
                .collect::<Vec<_>>();
            if !overridden.is_empty() {
                tracing::warn!(
                    "{}: member {} changed by {} mods; using {}",
                    name,
                    member,
                    overridden.len() + 1,
                    winner.source.path
                );
                conflicts.push(MemberConflict {
                    archive: name.clone(),
                    member: member.clone(),
                    winner: winner.source.path.clone(),
                    overridden,
                });
            }

            let src = self.materialize_member(winner.source, &winner.digest)?;
            let dst_rel = original_rel.unwrap_or(&winner.digest.path);
            tracing::debug!("{}: staging {} from {}", name, member, winner.source.path);
            copy_file_create_dirs(&src, &merged_dir.join(dst_rel))?;
            changed_members += 1;
        }
        tracing::debug!("{}: {}", name, MergeState::Compared);

        if changed_members == 0 {
            remove_dir_if_exists(&merged_dir)?;
            return Ok(SetResult {
                outcome: MergeOutcome::NoChangeNeeded,
                conflicts,
            });
        }

        // Fill in every original member no mod changed so the repack is complete
        copy_dir_all(&original_dir, &merged_dir, false)?;

        let packed = self
            .config
            .layout
            .merged_dir()
            .join(format!("{}.{}", name, self.config.archive_extension));
        remove_file_if_exists(&packed)?;
        self.codec.pack(&merged_dir, &packed)?;
        self.codec.encrypt(&packed)?;
        tracing::debug!("{}: {}", name, MergeState::Repacked);

        let output = self.config.layout.publish_dir().join(name);
        copy_file_create_dirs(&packed, &output)?;
        remove_file_if_exists(&packed)?;
        remove_dir_if_exists(&merged_dir)?;
        tracing::debug!("{}: {}", name, MergeState::Published);

        Ok(SetResult {
            outcome: MergeOutcome::Published {
                output,
                changed_members,
            },
            conflicts,
        })
    }

    /// Unpack a contributing copy into its content-addressed root and hash every member.
    fn unpack_copy(&self, copy: &FileDigest) -> Result<MemberDigests> {
        let lock = self.unpack_locks.get(&copy.hash);
        let _guard = lock_unpoisoned(&lock);

        // Roots are content-addressed, so a completed one can be shared by
        // every copy with the same hash.
        let root = self.config.layout.unpack_root(&copy.hash);
        let marker = unpack_marker(&root);
        if marker.is_file() && root.is_dir() {
            tracing::debug!("Reusing unpack root {} for {}", root, copy.path);
        } else {
            remove_dir_if_exists(&root)?;
            self.unpack_into(copy, &root)?;
            std::fs::write(marker.as_std_path(), b"")?;
        }

        // Hashed on this thread: a rayon job here could be handed another set
        // that waits on the lock we hold
        let anchor = &self.config.data_anchor;
        let members = list_files_relative(&root)?
            .iter()
            .map(|rel| -> Result<(String, FileDigest)> {
                let digest = hash_file(&root.join(rel))?;
                Ok((
                    logical_member_path(rel, anchor),
                    FileDigest::new(rel.clone(), digest.hash),
                ))
            })
            .collect::<Result<MemberDigests>>()?;

        tracing::debug!("Unpacked {} ({} members)", copy.path, members.len());
        Ok(members)
    }

    fn unpack_into(&self, copy: &FileDigest, root: &Utf8Path) -> Result<()> {
        let staged = Utf8PathBuf::from(format!("{}.{}", root, self.config.archive_extension));
        copy_file_create_dirs(&copy.path, &staged)?;

        let result = self
            .codec
            .decrypt(&staged, &self.config.manifest_path)
            .and_then(|_| self.codec.unpack(&staged, root));
        remove_file_if_exists(&staged)?;
        result?;
        Ok(())
    }

    /// On-disk path of a member of a contributing copy, unpacking the copy again
    /// if its root was removed since the cache entry was created.
    fn materialize_member(&self, copy: &FileDigest, member: &FileDigest) -> Result<Utf8PathBuf> {
        let root = self.config.layout.unpack_root(&copy.hash);
        let path = root.join(&member.path);
        if path.is_file() {
            return Ok(path);
        }

        let lock = self.unpack_locks.get(&copy.hash);
        let _guard = lock_unpoisoned(&lock);
        if !path.is_file() {
            tracing::debug!("Unpack root for {} missing, unpacking again", copy.path);
            self.unpack_into(copy, &root)?;
        }
        if !path.is_file() {
            return Err(Error::Other(format!(
                "member {} missing after unpacking {}",
                member.path, copy.path
            )));
        }
        Ok(path)
    }

    /// Remove archives published by the previous run.
    fn remove_stale_outputs(&self, previous: &MergeSnapshot) -> Result<()> {
        let publish_dir = self.config.layout.publish_dir();
        for name in previous.merge_sets.keys() {
            if remove_file_if_exists(&publish_dir.join(name))? {
                tracing::debug!("Removed previously published {}", name);
            }
        }
        Ok(())
    }

    /// Remove unpack roots and markers whose hash no committed cache entry has.
    fn prune_unpack_roots(&self) -> Result<usize> {
        let live = self.cache.committed_hashes();
        let unpacked_dir = self.config.layout.unpacked_dir();
        let mut pruned = 0;
        for entry in std::fs::read_dir(unpacked_dir.as_std_path())? {
            let entry = entry?;
            let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(Error::NonUtf8Path)?;
            let Some(name) = path.file_name() else {
                continue;
            };
            let hash = name.strip_suffix(".done").unwrap_or(name);
            if live.contains(&hash.to_ascii_uppercase()) {
                continue;
            }
            if entry.file_type()?.is_dir() {
                remove_dir_if_exists(&path)?;
                pruned += 1;
            } else {
                remove_file_if_exists(&path)?;
            }
        }
        Ok(pruned)
    }

    /// Emit a progress event if a callback was registered.
    fn emit_progress(
        &self,
        stage: MergeStage,
        current_file: Option<String>,
        current: u32,
        total: u32,
    ) {
        if let Some(callback) = &self.progress_callback {
            callback(MergeProgress {
                stage,
                current_file,
                current,
                total,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::obfuscate_path;
    use crate::codec::mock::{decode_archive, write_archive, MockCodec};
    use crate::config::MergeLayout;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const FOO: &str = "data/chr/foo.pac";
    const BAR: &str = "data/chr/bar.pac";
    const README: &str = "data/readme.txt";

    struct Fixture {
        _dir: TempDir,
        root: Utf8PathBuf,
    }

    fn init_test_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    impl Fixture {
        fn new() -> Self {
            init_test_logging();
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
            Self { _dir: dir, root }
        }

        fn config(&self) -> MergeConfig {
            MergeConfig::new(
                MergeLayout::new(self.root.join("work"), self.root.join("game")),
                self.root.join("paths.txt"),
            )
            .with_threads(Some(2))
        }

        fn engine(&self, codec: &Arc<MockCodec>) -> MergeEngine {
            let catalog = PathCatalog::from_paths([FOO, BAR, README]);
            MergeEngine::new(self.config(), catalog, codec.clone())
        }

        fn write_original(&self, logical: &str, members: &[(&str, &[u8])]) -> String {
            let key = obfuscate_path(logical);
            write_archive(&self.root.join("game").join(&key), members);
            key
        }

        fn write_mod(&self, mod_name: &str, key: &str, members: &[(&str, &[u8])]) -> Utf8PathBuf {
            let mod_dir = self.root.join("mods").join(mod_name);
            write_archive(&mod_dir.join("Redirector").join(key), members);
            mod_dir
        }

        fn published(&self, key: &str) -> Utf8PathBuf {
            self.root.join("work/Redirector").join(key)
        }

        fn published_members(&self, key: &str) -> BTreeMap<String, Vec<u8>> {
            decode_archive(&std::fs::read(self.published(key)).unwrap())
        }
    }

    const ORIGINAL: &[(&str, &[u8])] = &[
        ("data/a.bin", b"orig-a"),
        ("data/b.bin", b"orig-b"),
        ("data/c.bin", b"orig-c"),
    ];

    #[test]
    fn test_merge_combines_changes_from_each_mod() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod(
            "A",
            &key,
            &[("data/a.bin", b"A"), ("data/b.bin", b"orig-b"), ("data/c.bin", b"orig-c")],
        );
        let mod_b = fx.write_mod(
            "B",
            &key,
            &[("data/a.bin", b"orig-a"), ("data/b.bin", b"B"), ("data/c.bin", b"orig-c")],
        );

        let codec = Arc::new(MockCodec::new());
        let report = fx.engine(&codec).run(&[mod_a, mod_b]).unwrap();

        assert!(report.succeeded());
        assert!(!report.short_circuited);
        assert!(report.conflicts.is_empty());
        assert_eq!(
            report.outcomes[&key],
            MergeOutcome::Published {
                output: fx.published(&key),
                changed_members: 2,
            }
        );

        let merged = fx.published_members(&key);
        assert_eq!(merged["data/a.bin"], b"A");
        assert_eq!(merged["data/b.bin"], b"B");
        assert_eq!(merged["data/c.bin"], b"orig-c");
        assert_eq!(report.new_cache_entries, 2);
    }

    #[test]
    fn test_member_added_by_mod_is_published() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod("A", &key, &[("data/new.bin", b"new")]);
        let mod_b = fx.write_mod("B", &key, &[("data/a.bin", b"orig-a")]);

        let codec = Arc::new(MockCodec::new());
        let report = fx.engine(&codec).run(&[mod_a, mod_b]).unwrap();

        assert!(matches!(
            report.outcomes[&key],
            MergeOutcome::Published { changed_members: 1, .. }
        ));
        let merged = fx.published_members(&key);
        assert_eq!(merged["data/new.bin"], b"new");
        assert_eq!(merged["data/a.bin"], b"orig-a");
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn test_no_change_needed_publishes_nothing() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod("A", &key, ORIGINAL);
        let mod_b = fx.write_mod("B", &key, &[("data/c.bin", b"orig-c")]);

        let codec = Arc::new(MockCodec::new());
        let report = fx.engine(&codec).run(&[mod_a, mod_b]).unwrap();

        assert_eq!(report.outcomes[&key], MergeOutcome::NoChangeNeeded);
        assert_eq!(report.count_no_change(), 1);
        assert!(!fx.published(&key).exists());
        assert_eq!(codec.packs.load(Ordering::SeqCst), 0);
        assert_eq!(codec.encrypts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_conflicting_changes_first_mod_wins() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"A")]);
        let mod_b = fx.write_mod("B", &key, &[("data/a.bin", b"B")]);

        let codec = Arc::new(MockCodec::new());
        let report = fx
            .engine(&codec)
            .run(&[mod_a.clone(), mod_b.clone()])
            .unwrap();

        assert_eq!(fx.published_members(&key)["data/a.bin"], b"A");
        assert_eq!(
            report.conflicts,
            vec![MemberConflict {
                archive: key.clone(),
                member: "data/a.bin".to_string(),
                winner: mod_a.join("Redirector").join(&key),
                overridden: vec![mod_b.join("Redirector").join(&key)],
            }]
        );
    }

    #[test]
    fn test_identical_changes_are_not_conflicts() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"same"), ("data/b.bin", b"x")]);
        let mod_b = fx.write_mod("B", &key, &[("data/a.bin", b"same")]);

        let codec = Arc::new(MockCodec::new());
        let report = fx.engine(&codec).run(&[mod_a, mod_b]).unwrap();

        assert!(report.conflicts.is_empty());
        assert_eq!(fx.published_members(&key)["data/a.bin"], b"same");
    }

    #[test]
    fn test_second_run_short_circuits() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"A")]);
        let mod_b = fx.write_mod("B", &key, &[("data/b.bin", b"B")]);
        let mods = [mod_a, mod_b];

        fx.engine(&Arc::new(MockCodec::new())).run(&mods).unwrap();

        let codec = Arc::new(MockCodec::new());
        let report = fx.engine(&codec).run(&mods).unwrap();

        assert!(report.short_circuited);
        assert!(report.outcomes.is_empty());
        assert_eq!(codec.total_calls(), 0);
        assert!(fx.published(&key).exists());
    }

    #[test]
    fn test_forced_run_reuses_unpack_cache() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"A")]);
        let mod_b = fx.write_mod("B", &key, &[("data/b.bin", b"B")]);
        let mods = [mod_a, mod_b];

        let first = Arc::new(MockCodec::new());
        fx.engine(&first).run(&mods).unwrap();
        assert_eq!(first.unpack_calls(), 3);

        let codec = Arc::new(MockCodec::new());
        let report = fx.engine(&codec).with_force(true).run(&mods).unwrap();

        assert!(!report.short_circuited);
        assert_eq!(report.new_cache_entries, 0);
        // Only the original is unpacked again; both mod copies come from the cache
        assert_eq!(codec.unpack_calls(), 1);
        assert_eq!(fx.published_members(&key)["data/a.bin"], b"A");
    }

    #[test]
    fn test_cache_hit_without_unpack_root_unpacks_again() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"A")]);
        let mod_b = fx.write_mod("B", &key, &[("data/b.bin", b"B")]);
        let mods = [mod_a, mod_b];

        fx.engine(&Arc::new(MockCodec::new())).run(&mods).unwrap();
        remove_dir_if_exists(&fx.config().layout.unpacked_dir()).unwrap();

        let codec = Arc::new(MockCodec::new());
        fx.engine(&codec).with_force(true).run(&mods).unwrap();

        let merged = fx.published_members(&key);
        assert_eq!(merged["data/a.bin"], b"A");
        assert_eq!(merged["data/b.bin"], b"B");
    }

    #[test]
    fn test_changed_mod_reruns_and_removes_stale_output() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"A")]);
        let mod_b = fx.write_mod("B", &key, &[("data/b.bin", b"orig-b")]);
        let mods = [mod_a, mod_b];

        fx.engine(&Arc::new(MockCodec::new())).run(&mods).unwrap();
        assert!(fx.published(&key).exists());

        // Mod A reverts its change
        fx.write_mod("A", &key, &[("data/a.bin", b"orig-a")]);
        let report = fx.engine(&Arc::new(MockCodec::new())).run(&mods).unwrap();

        assert!(!report.short_circuited);
        assert_eq!(report.outcomes[&key], MergeOutcome::NoChangeNeeded);
        assert!(!fx.published(&key).exists());
    }

    #[test]
    fn test_reverting_after_failed_run_republishes() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"A")]);
        let mod_b = fx.write_mod("B", &key, &[("data/b.bin", b"B")]);
        let mods = [mod_a, mod_b];

        fx.engine(&Arc::new(MockCodec::new())).run(&mods).unwrap();
        assert!(fx.published(&key).exists());

        // Mod A changes but the original cannot be unpacked this time
        fx.write_mod("A", &key, &[("data/a.bin", b"A2")]);
        let failing = Arc::new(MockCodec::new());
        failing.fail_unpack_of(&key);
        let report = fx.engine(&failing).run(&mods).unwrap();
        assert!(!report.succeeded());
        assert!(!fx.published(&key).exists());

        // Back to the content of the last successful run
        fx.write_mod("A", &key, &[("data/a.bin", b"A")]);
        let report = fx.engine(&Arc::new(MockCodec::new())).run(&mods).unwrap();

        assert!(!report.short_circuited);
        assert!(report.succeeded());
        let merged = fx.published_members(&key);
        assert_eq!(merged["data/a.bin"], b"A");
        assert_eq!(merged["data/b.bin"], b"B");

        let report = fx.engine(&Arc::new(MockCodec::new())).run(&mods).unwrap();
        assert!(report.short_circuited);
    }

    #[test]
    fn test_unpack_roots_of_replaced_copies_are_pruned() {
        let fx = Fixture::new();
        let key = fx.write_original(FOO, ORIGINAL);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"A0")]);
        let mod_b = fx.write_mod("B", &key, &[("data/b.bin", b"B")]);
        let mods = [mod_a, mod_b];
        let unpacked_dir = fx.config().layout.unpacked_dir();

        for edit in 1..=4 {
            let engine = fx.engine(&Arc::new(MockCodec::new()));
            let report = engine.run(&mods).unwrap();
            assert!(report.succeeded());
            assert_eq!(engine.cache().stats().committed, 2);

            let roots = std::fs::read_dir(unpacked_dir.as_std_path())
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().unwrap().is_dir())
                .count();
            assert_eq!(roots, 2);

            let content = format!("A{}", edit);
            fx.write_mod("A", &key, &[("data/a.bin", content.as_bytes())]);
        }
        assert_eq!(std::fs::read_dir(unpacked_dir.as_std_path()).unwrap().count(), 4);
    }

    #[test]
    fn test_sets_sharing_identical_copies_unpack_each_once() {
        let fx = Fixture::new();
        let foo = fx.write_original(FOO, ORIGINAL);
        let bar = fx.write_original(BAR, ORIGINAL);
        let mod_a = fx.root.join("mods/A");
        let mod_b = fx.root.join("mods/B");
        for key in [&foo, &bar] {
            fx.write_mod("A", key, &[("data/a.bin", b"A")]);
            fx.write_mod("B", key, &[("data/b.bin", b"B")]);
        }

        let codec = Arc::new(MockCodec::new());
        let report = fx.engine(&codec).run(&[mod_a, mod_b]).unwrap();

        assert!(report.succeeded());
        assert_eq!(report.published().count(), 2);
        // Two originals plus one unpack per distinct copy content
        assert_eq!(codec.unpack_calls(), 4);
        for key in [&foo, &bar] {
            let merged = fx.published_members(key);
            assert_eq!(merged["data/a.bin"], b"A");
            assert_eq!(merged["data/b.bin"], b"B");
        }
    }

    #[test]
    fn test_unrecognized_name_is_skipped_without_codec_work() {
        let fx = Fixture::new();
        let mod_a = fx.write_mod("A", "NOT_IN_CATALOG", &[("data/a.bin", b"A")]);
        let mod_b = fx.write_mod("B", "NOT_IN_CATALOG", &[("data/a.bin", b"B")]);

        let codec = Arc::new(MockCodec::new());
        let report = fx.engine(&codec).run(&[mod_a, mod_b]).unwrap();

        assert_eq!(
            report.outcomes["NOT_IN_CATALOG"],
            MergeOutcome::Skipped(SkipReason::UnrecognizedName)
        );
        assert!(report.succeeded());
        assert_eq!(codec.total_calls(), 0);
        assert!(!fx.published("NOT_IN_CATALOG").exists());
    }

    #[test]
    fn test_non_archive_entry_is_skipped() {
        let fx = Fixture::new();
        let key = obfuscate_path(README);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"A")]);
        let mod_b = fx.write_mod("B", &key, &[("data/a.bin", b"B")]);

        let codec = Arc::new(MockCodec::new());
        let report = fx.engine(&codec).run(&[mod_a, mod_b]).unwrap();

        assert!(matches!(
            &report.outcomes[&key],
            MergeOutcome::Skipped(SkipReason::NotAnArchive { logical_path }) if logical_path.ends_with("readme.txt")
        ));
        assert_eq!(codec.total_calls(), 0);
    }

    #[test]
    fn test_missing_original_is_skipped() {
        let fx = Fixture::new();
        let key = obfuscate_path(FOO);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"A")]);
        let mod_b = fx.write_mod("B", &key, &[("data/a.bin", b"B")]);

        let codec = Arc::new(MockCodec::new());
        let report = fx.engine(&codec).run(&[mod_a, mod_b]).unwrap();

        assert_eq!(
            report.outcomes[&key],
            MergeOutcome::Skipped(SkipReason::OriginalMissing)
        );
        assert_eq!(codec.total_calls(), 0);
    }

    #[test]
    fn test_codec_failure_skips_only_that_set() {
        let fx = Fixture::new();
        let foo = fx.write_original(FOO, ORIGINAL);
        let bar = fx.write_original(BAR, ORIGINAL);
        let mod_a = fx.root.join("mods/A");
        let mod_b = fx.root.join("mods/B");
        for key in [&foo, &bar] {
            fx.write_mod("A", key, &[("data/a.bin", b"A")]);
            fx.write_mod("B", key, &[("data/b.bin", b"B")]);
        }

        let codec = Arc::new(MockCodec::new());
        codec.fail_unpack_of(&foo);
        let engine = fx.engine(&codec);
        let report = engine.run(&[mod_a, mod_b]).unwrap();

        assert!(matches!(
            report.outcomes[&foo],
            MergeOutcome::Skipped(SkipReason::Codec(_))
        ));
        assert!(matches!(report.outcomes[&bar], MergeOutcome::Published { .. }));
        assert!(!report.succeeded());
        assert!(fx.published(&bar).exists());

        // The snapshot stays incomplete so the next run merges again
        let snapshot = MergeSnapshot::load(&fx.config().layout.snapshot_path())
            .unwrap()
            .unwrap();
        assert!(snapshot.incomplete);
        assert_eq!(engine.cache().stats().committed, 0);
        assert_eq!(engine.cache().stats().pending, 0);
    }

    #[test]
    fn test_progress_reports_every_set() {
        let fx = Fixture::new();
        let foo = fx.write_original(FOO, ORIGINAL);
        let bar = fx.write_original(BAR, ORIGINAL);
        let mod_a = fx.root.join("mods/A");
        let mod_b = fx.root.join("mods/B");
        for key in [&foo, &bar] {
            fx.write_mod("A", key, &[("data/a.bin", b"A")]);
            fx.write_mod("B", key, &[("data/b.bin", b"B")]);
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let engine = fx
            .engine(&Arc::new(MockCodec::new()))
            .with_progress(move |p| sink.lock().unwrap().push(p));
        engine.run(&[mod_a, mod_b]).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.first().map(|e| e.stage), Some(MergeStage::Detecting));
        assert_eq!(events.last().map(|e| e.stage), Some(MergeStage::Complete));
        let merging = events
            .iter()
            .filter(|e| e.stage == MergeStage::Merging)
            .collect::<Vec<_>>();
        assert_eq!(merging.len(), 2);
        assert!(merging.iter().all(|e| e.total == 2));
    }

    #[test]
    fn test_plan_resolves_names() {
        let fx = Fixture::new();
        let key = obfuscate_path(FOO);
        let mod_a = fx.write_mod("A", &key, &[("data/a.bin", b"A")]);
        let mod_b = fx.write_mod("B", &key, &[("data/a.bin", b"B")]);
        fx.write_mod("A", "UNKNOWN", &[]);
        fx.write_mod("B", "UNKNOWN", &[]);

        let codec = Arc::new(MockCodec::new());
        let plan = fx.engine(&codec).plan(&[mod_a, mod_b]).unwrap();

        assert_eq!(plan.len(), 2);
        let resolved = plan.iter().find(|p| p.archive_name == key).unwrap();
        assert!(resolved.logical_path.as_deref().unwrap().ends_with("foo.pac"));
        assert_eq!(resolved.contributors.len(), 2);
        let unknown = plan.iter().find(|p| p.archive_name == "UNKNOWN").unwrap();
        assert!(unknown.logical_path.is_none());
        assert_eq!(codec.total_calls(), 0);
    }
}
