//! Archive codec abstraction.
//!
//! The binary layout of a `.pac` archive is opaque to this crate. Everything that
//! touches it goes through an [`ArchiveCodec`]: decrypting and encrypting an
//! archive in place, unpacking it into a directory and packing a directory back
//! into an archive.
//!
//! [`CommandCodec`] drives an external command-line tool. Tests use an
//! in-process mock that counts invocations.

mod command;
#[cfg(test)]
pub(crate) mod mock;

pub use command::{CodecCommands, CommandCodec, DEFAULT_CODEC_TIMEOUT_SECS};

use crate::error::CodecError;
use camino::Utf8Path;

/// Result alias for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Performs the four archive transformations the merge engine needs.
///
/// Implementations must be [`Send`] + [`Sync`]: merge sets are processed on a
/// worker pool and share one codec.
pub trait ArchiveCodec: Send + Sync {
    /// Decrypt `archive` in place. `manifest` lets the tool recover member names.
    fn decrypt(&self, archive: &Utf8Path, manifest: &Utf8Path) -> CodecResult<()>;

    /// Encrypt `archive` in place.
    fn encrypt(&self, archive: &Utf8Path) -> CodecResult<()>;

    /// Unpack a decrypted `archive` into `out_dir`.
    fn unpack(&self, archive: &Utf8Path, out_dir: &Utf8Path) -> CodecResult<()>;

    /// Pack the contents of `dir` into a new archive at `out_archive`.
    fn pack(&self, dir: &Utf8Path, out_archive: &Utf8Path) -> CodecResult<()>;
}
