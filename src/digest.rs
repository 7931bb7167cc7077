//! Streaming SHA-1 content digests with a per-run memo.

use std::{
    collections::HashMap,
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use sha1::{Digest as _, Sha1};
use thiserror::Error;

use crate::model::{ResolvedFile, Sha1Hex};

const CHUNK_SIZE: usize = 64 * 1024;

/// Errors raised while hashing a file.
#[derive(Debug, Error)]
pub enum DigestError {
    /// The file vanished or became unreadable after it was enumerated.
    #[error("Failed to hash {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Hash a file in fixed-size chunks without buffering it whole.
pub fn sha1_file(path: &Path) -> Result<(Sha1Hex, u64), DigestError> {
    let mut file = fs::File::open(path).map_err(|source| DigestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = file.read(&mut buffer).map_err(|source| DigestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if read == 0 {
            break;
        }
        total += read as u64;
        hasher.update(&buffer[..read]);
    }
    Ok((hex_digest(hasher), total))
}

/// Hash an in-memory buffer, used for fetched remote images.
pub fn sha1_bytes(bytes: &[u8]) -> Sha1Hex {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha1) -> Sha1Hex {
    Sha1Hex::from_hex_unchecked(format!("{:x}", hasher.finalize()))
}

/// Per-run memo of file digests keyed by absolute path.
///
/// A path is hashed at most once per run, so the same path can never report
/// two different digests. Failures are not cached.
#[derive(Debug, Default)]
pub struct DigestCache {
    entries: HashMap<PathBuf, ResolvedFile>,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized file identity, hashing on first use.
    pub fn resolve(&mut self, abs_path: &Path) -> Result<ResolvedFile, DigestError> {
        if let Some(hit) = self.entries.get(abs_path) {
            return Ok(hit.clone());
        }
        let (digest, size_bytes) = sha1_file(abs_path)?;
        let resolved = ResolvedFile {
            abs_path: abs_path.to_path_buf(),
            digest,
            size_bytes,
        };
        self.entries.insert(abs_path.to_path_buf(), resolved.clone());
        Ok(resolved)
    }
}
