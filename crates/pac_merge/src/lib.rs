//! Merging of redirected game archives replaced by more than one mod.
//!
//! Mods that use a file redirector ship whole replacement archives. When two
//! mods replace the same archive only one copy can win, so edits from the
//! other mod are lost. This crate finds such archives, unpacks every
//! contributing copy alongside the pristine game original, takes every member
//! a mod actually changed, and repacks one merged archive per name.
//!
//! - **Obfuscated names**: archives on disk are named by the MD5 of their
//!   logical path; the [`PathCatalog`] maps them back.
//! - **Unpack cache**: contents of every unpacked copy are remembered by hash,
//!   so unchanged mods are never unpacked twice.
//! - **Run short-circuit**: if no contributing archive changed since the last
//!   successful run, no codec work happens at all.
//! - **External codec**: decrypt/encrypt/unpack/pack go through the
//!   [`ArchiveCodec`] trait, by default an external program ([`CommandCodec`]).
//!
//! # Example
//!
//! ```no_run
//! use camino::Utf8PathBuf;
//! use pac_merge::{
//!     CodecCommands, CommandCodec, MergeConfig, MergeEngine, MergeLayout, PathCatalog,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let layout = MergeLayout::new(
//!     Utf8PathBuf::from("C:/Mods/merger"),
//!     Utf8PathBuf::from("C:/Games/P4AU/data"),
//! );
//! let config = MergeConfig::new(layout, Utf8PathBuf::from("C:/Mods/merger/paths.txt"));
//! let catalog = PathCatalog::load(&config.manifest_path)?;
//! let codec = Arc::new(CommandCodec::new(CodecCommands::default()));
//!
//! let engine = MergeEngine::new(config, catalog, codec).with_progress(|progress| {
//!     println!("{:?} {}/{}", progress.stage, progress.current, progress.total);
//! });
//!
//! let report = engine.run(&[
//!     Utf8PathBuf::from("C:/Mods/first"),
//!     Utf8PathBuf::from("C:/Mods/second"),
//! ])?;
//! println!("Published {} archives", report.published().count());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod detector;
pub mod digest;
pub mod engine;
pub mod error;
pub mod mods;
pub mod originals;
pub mod state;
pub mod utils;

// Re-export main types
pub use cache::{ArchiveContents, CacheStats, UnpackCache};
pub use catalog::{obfuscate_path, normalize_manifest_line, PathCatalog, PathEntry};
pub use codec::{ArchiveCodec, CodecCommands, CommandCodec};
pub use config::{MergeConfig, MergeLayout};
pub use detector::{find_merge_sets, MergeSet};
pub use digest::{hash_file, FileDigest};
pub use engine::{
    MemberConflict, MergeEngine, MergeOutcome, MergeProgress, MergeReport, MergeStage,
    PlannedMerge, SkipReason,
};
pub use error::{CodecError, Error, Result};
pub use mods::{discover_mods, DiscoveredMod, ModConfig};
pub use state::MergeSnapshot;
