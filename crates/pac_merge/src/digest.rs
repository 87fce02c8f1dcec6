//! Content digests for archives and their members.
//!
//! A [`FileDigest`] pairs a path with the XXH3-128 hash of the file's full byte
//! content. Identity for merge purposes is the content, not the location, so
//! digests are compared with [`FileDigest::content_equals`] rather than `==`.

use crate::error::Result;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use xxhash_rust::xxh3::{xxh3_128, Xxh3};

/// Length of a rendered content hash in hex characters.
pub const HASH_HEX_LEN: usize = 32;

const READ_BUF_SIZE: usize = 64 * 1024;

/// A path together with the hash of its full content.
///
/// Deliberately does not implement `PartialEq`: two digests naming different
/// paths but carrying the same hash are the same content, which is not what a
/// caller reaching for `==` would expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDigest {
    pub path: Utf8PathBuf,
    pub hash: String,
}

impl FileDigest {
    pub fn new(path: impl Into<Utf8PathBuf>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
        }
    }

    /// Returns `true` when both digests describe the same bytes, regardless of path.
    pub fn content_equals(&self, other: &FileDigest) -> bool {
        self.hash.eq_ignore_ascii_case(&other.hash)
    }
}

/// Hash the full content of a file.
pub fn hash_file(path: &Utf8Path) -> Result<FileDigest> {
    let mut reader = BufReader::new(File::open(path.as_std_path())?);
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(FileDigest::new(path, render_hash(hasher.digest128())))
}

/// Hash an in-memory buffer, rendered the same way as [`hash_file`].
pub fn hash_bytes(bytes: &[u8]) -> String {
    render_hash(xxh3_128(bytes))
}

fn render_hash(value: u128) -> String {
    format!("{:032X}", value)
}
