//! In-process codec used by tests.
//!
//! An "archive" is a JSON object of member path -> bytes. Encryption prefixes
//! the file with [`MAGIC`] and inverts every byte. Each operation is counted so
//! tests can assert that no codec work happened.

use super::{ArchiveCodec, CodecResult};
use crate::error::CodecError;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const MAGIC: &[u8] = b"ENC1";

#[derive(Debug, Default)]
pub(crate) struct MockCodec {
    pub decrypts: AtomicUsize,
    pub encrypts: AtomicUsize,
    pub unpacks: AtomicUsize,
    pub packs: AtomicUsize,
    /// File names whose unpack should fail.
    fail_unpack: Mutex<Vec<String>>,
}

impl MockCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_unpack_of(&self, file_name: &str) {
        self.fail_unpack.lock().unwrap().push(file_name.to_string());
    }

    pub fn total_calls(&self) -> usize {
        self.decrypts.load(Ordering::SeqCst)
            + self.encrypts.load(Ordering::SeqCst)
            + self.unpacks.load(Ordering::SeqCst)
            + self.packs.load(Ordering::SeqCst)
    }

    pub fn unpack_calls(&self) -> usize {
        self.unpacks.load(Ordering::SeqCst)
    }
}

/// Build encrypted archive bytes from `(member path, bytes)` pairs.
pub(crate) fn encode_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let map: BTreeMap<String, Vec<u8>> = members
        .iter()
        .map(|(p, b)| (p.to_string(), b.to_vec()))
        .collect();
    let mut out = MAGIC.to_vec();
    out.extend(serde_json::to_vec(&map).unwrap().iter().map(|b| !b));
    out
}

/// Read back the members of an encrypted archive.
pub(crate) fn decode_archive(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let plain = bytes
        .strip_prefix(MAGIC)
        .expect("archive is not encrypted")
        .iter()
        .map(|b| !b)
        .collect::<Vec<_>>();
    serde_json::from_slice(&plain).unwrap()
}

fn failed(operation: &'static str, path: &Utf8Path, status: &str) -> CodecError {
    CodecError::Failed {
        operation,
        path: path.to_path_buf(),
        status: status.to_string(),
    }
}

impl ArchiveCodec for MockCodec {
    fn decrypt(&self, archive: &Utf8Path, _manifest: &Utf8Path) -> CodecResult<()> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        let bytes = std::fs::read(archive.as_std_path())?;
        let Some(body) = bytes.strip_prefix(MAGIC) else {
            return Err(failed("decrypt", archive, "not encrypted"));
        };
        let plain = body.iter().map(|b| !b).collect::<Vec<_>>();
        std::fs::write(archive.as_std_path(), plain)?;
        Ok(())
    }

    fn encrypt(&self, archive: &Utf8Path) -> CodecResult<()> {
        self.encrypts.fetch_add(1, Ordering::SeqCst);
        let bytes = std::fs::read(archive.as_std_path())?;
        let mut out = MAGIC.to_vec();
        out.extend(bytes.iter().map(|b| !b));
        std::fs::write(archive.as_std_path(), out)?;
        Ok(())
    }

    fn unpack(&self, archive: &Utf8Path, out_dir: &Utf8Path) -> CodecResult<()> {
        self.unpacks.fetch_add(1, Ordering::SeqCst);
        let name = archive.file_name().unwrap_or_default().to_string();
        if self.fail_unpack.lock().unwrap().iter().any(|n| *n == name) {
            return Err(failed("unpack", archive, "exit status: 1"));
        }

        let bytes = std::fs::read(archive.as_std_path())?;
        let members: BTreeMap<String, Vec<u8>> = serde_json::from_slice(&bytes)
            .map_err(|_| failed("unpack", archive, "corrupt archive"))?;
        for (rel, data) in members {
            let target = out_dir.join(&rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent.as_std_path())?;
            }
            std::fs::write(target.as_std_path(), data)?;
        }
        std::fs::create_dir_all(out_dir.as_std_path())?;
        Ok(())
    }

    fn pack(&self, dir: &Utf8Path, out_archive: &Utf8Path) -> CodecResult<()> {
        self.packs.fetch_add(1, Ordering::SeqCst);
        let mut members = BTreeMap::new();
        let files = crate::utils::list_files_relative(dir)
            .map_err(|e| failed("pack", dir, &e.to_string()))?;
        for rel in files {
            let data = std::fs::read(dir.join(&rel).as_std_path())?;
            members.insert(rel.as_str().replace('\\', "/"), data);
        }
        let bytes = serde_json::to_vec(&members).map_err(|e| failed("pack", dir, &e.to_string()))?;
        std::fs::write(out_archive.as_std_path(), bytes)?;
        Ok(())
    }
}

/// Write an encrypted archive file, creating parent directories.
pub(crate) fn write_archive(path: &Utf8PathBuf, members: &[(&str, &[u8])]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, encode_archive(members)).unwrap();
}
