//! Error types for merge operations.
//!
//! All fallible functions in this crate return [`Result<T>`], which uses [`Error`]
//! as the error type. External error types (`std::io::Error`, `serde_json::Error`,
//! MessagePack errors) are automatically converted via `From` impls.
//!
//! Only a few of these errors are fatal to a whole run: an unreadable catalog
//! manifest and scratch directories that cannot be created. Everything raised
//! while processing a single merge set is caught by the engine and turned into a
//! [`SkipReason`](crate::engine::SkipReason) for that set.

use camino::Utf8PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while detecting and merging archives.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed (hashing, staging, publishing, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or serialize JSON (merge snapshot, mod config).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to encode the unpack cache.
    #[error("Cache encode error: {0}")]
    CacheEncode(#[from] rmp_serde::encode::Error),

    /// Directory traversal failed while hashing unpacked members.
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// The path catalog manifest could not be opened or read.
    #[error("Path manifest unreadable: {path}")]
    ManifestUnreadable {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An archive name has no entry in the path catalog.
    #[error("Unrecognized archive name: {0}")]
    UnrecognizedArchiveName(String),

    /// The catalog resolved the name, but not to an archive.
    #[error("'{name}' resolves to '{logical_path}', which is not an archive")]
    NotAnArchive {
        name: String,
        logical_path: String,
    },

    /// The external archive tool failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The persisted unpack cache could not be decoded.
    #[error("Unpack cache is corrupt: {0}")]
    CacheCorrupt(String),

    /// A scratch or output directory could not be created.
    #[error("Failed to prepare directory {path}: {source}")]
    ScratchSetup {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The pristine game copy of an archive does not exist.
    #[error("Original archive not found: {0}")]
    OriginalMissing(Utf8PathBuf),

    /// Path was not valid UTF-8.
    #[error("Non UTF-8 path: {0}")]
    NonUtf8Path(std::path::PathBuf),

    /// Catch-all for errors with no dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

/// Errors raised by an [`ArchiveCodec`](crate::codec::ArchiveCodec).
#[derive(Error, Debug)]
pub enum CodecError {
    /// The codec process could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The codec ran but reported failure.
    #[error("{operation} failed for {path} ({status})")]
    Failed {
        operation: &'static str,
        path: Utf8PathBuf,
        status: String,
    },

    /// The codec did not finish within the configured timeout and was killed.
    #[error("{operation} timed out after {timeout:?} for {path}")]
    TimedOut {
        operation: &'static str,
        path: Utf8PathBuf,
        timeout: Duration,
    },

    /// The codec exited successfully but its output is missing.
    #[error("{operation} produced no output for {path}")]
    MissingOutput {
        operation: &'static str,
        path: Utf8PathBuf,
    },

    /// I/O failure while talking to the codec.
    #[error("codec IO error: {0}")]
    Io(#[from] std::io::Error),
}
