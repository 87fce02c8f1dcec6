//! Path catalog for resolving obfuscated archive names.
//!
//! Archives in the game's data directory are stored under a name that is the
//! upper-case hex MD5 of their lower-cased logical path, e.g.
//! `data/char/char_ai_pal.pac`. The catalog is built once per run from a
//! line-oriented manifest of logical paths and answers two questions:
//!
//! 1. **Key lookup** ([`find_by_key`](PathCatalog::find_by_key)): which logical
//!    path hides behind an obfuscated key?
//! 2. **Archive lookup** ([`find_archive`](PathCatalog::find_archive)): the same,
//!    but starting from an on-disk file name that may carry an extension.
//!
//! The manifest contains comment and metadata lines next to real paths. Lines
//! that do not normalize to a well-formed path are skipped without error.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

const INVALID_PATH_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// One manifest line, resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    /// Normalized logical path using the platform's native separator.
    pub logical_path: String,
    /// Upper-case hex MD5 of the normalized (forward-slash) logical path.
    pub obfuscated_key: String,
}

impl PathEntry {
    /// Extension of the logical path, without the leading dot.
    pub fn extension(&self) -> Option<&str> {
        Utf8Path::new(&self.logical_path).extension()
    }

    /// Whether the logical path carries the given extension (case-insensitive).
    pub fn has_extension(&self, extension: &str) -> bool {
        self.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
    }
}

/// Read-only index from obfuscated key to logical path.
#[derive(Debug, Clone, Default)]
pub struct PathCatalog {
    manifest_path: Utf8PathBuf,
    entries: HashMap<String, PathEntry>,
}

impl PathCatalog {
    /// Load and index a manifest file.
    ///
    /// Fails with [`Error::ManifestUnreadable`] if the file cannot be opened or read.
    pub fn load(manifest_path: &Utf8Path) -> Result<Self> {
        let unreadable = |source| Error::ManifestUnreadable {
            path: manifest_path.to_path_buf(),
            source,
        };

        let file = File::open(manifest_path.as_std_path()).map_err(unreadable)?;
        let mut catalog = Self {
            manifest_path: manifest_path.to_path_buf(),
            entries: HashMap::new(),
        };

        let mut skipped = 0usize;
        let mut duplicates = 0usize;
        for line in BufReader::new(file).split(b'\n') {
            let line = line.map_err(unreadable)?;
            // Metadata lines may carry non-UTF-8 bytes; they are never paths
            let Ok(line) = std::str::from_utf8(&line) else {
                skipped += 1;
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            let Some(normalized) = normalize_manifest_line(line) else {
                skipped += 1;
                continue;
            };
            if !catalog.insert(&normalized) {
                duplicates += 1;
            }
        }

        tracing::info!(
            "Path catalog loaded from {}: {} entries",
            manifest_path,
            catalog.len()
        );
        tracing::debug!(
            "Path catalog skipped {} non-path line(s), {} duplicate key(s)",
            skipped,
            duplicates
        );

        Ok(catalog)
    }

    /// Build a catalog directly from logical paths. Invalid paths are skipped.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = Self::default();
        for path in paths {
            if let Some(normalized) = normalize_manifest_line(path.as_ref()) {
                catalog.insert(&normalized);
            }
        }
        catalog
    }

    /// Insert a normalized path. Returns `false` if its key was already taken;
    /// the first entry for a key wins.
    fn insert(&mut self, normalized: &str) -> bool {
        let key = obfuscate_path(normalized);
        if self.entries.contains_key(&key) {
            return false;
        }
        let logical_path = normalized.replace('/', std::path::MAIN_SEPARATOR_STR);
        self.entries.insert(
            key.clone(),
            PathEntry {
                logical_path,
                obfuscated_key: key,
            },
        );
        true
    }

    /// Find the entry for an obfuscated key (case-insensitive).
    pub fn find_by_key(&self, key: &str) -> Option<&PathEntry> {
        self.entries.get(&key.to_ascii_uppercase())
    }

    /// Find the entry for an on-disk archive file name.
    ///
    /// The full name is tried first, then the name with its extension stripped.
    pub fn find_archive(&self, file_name: &str) -> Option<&PathEntry> {
        self.find_by_key(file_name).or_else(|| {
            Utf8Path::new(file_name)
                .file_stem()
                .and_then(|stem| self.find_by_key(stem))
        })
    }

    /// Path of the manifest this catalog was loaded from (empty when built in memory).
    pub fn manifest_path(&self) -> &Utf8Path {
        &self.manifest_path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compute the obfuscated key for an already normalized logical path.
pub fn obfuscate_path(normalized: &str) -> String {
    hex::encode_upper(Md5::digest(normalized.as_bytes()))
}

/// Normalize a manifest line into a lower-case, forward-slash logical path.
///
/// Returns `None` for lines that are not well-formed paths (comments, headers,
/// paths with empty or relative segments, or characters Windows rejects).
pub fn normalize_manifest_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with(';')
        || trimmed.starts_with("//")
    {
        return None;
    }

    if trimmed
        .chars()
        .any(|c| !(' '..='~').contains(&c) || INVALID_PATH_CHARS.contains(&c))
    {
        return None;
    }

    let segments = trimmed
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    if segments.is_empty()
        || segments
            .iter()
            .any(|s| *s == "." || *s == ".." || s.trim().is_empty())
    {
        return None;
    }

    let last = segments.last()?;
    if last.starts_with('.') || Utf8Path::new(last).file_stem().map_or(true, str::is_empty) {
        return None;
    }

    Some(segments.join("/").to_lowercase())
}
