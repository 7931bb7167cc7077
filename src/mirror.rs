//! Content-addressable mirror into the managed media store.
//!
//! Destinations are `user_<owner>/<digest12>_<basename>`, so the same content
//! for the same owner always lands on the same path and a present destination
//! is never rewritten.

use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::digest;
use crate::model::{MirroredAsset, ResolvedFile, UserId};

mod naming;
mod remote;

pub use naming::{
    dest_path_for, extension_for_content_type, remote_basename, sanitize_basename,
    sniff_extension,
};
pub use remote::{FetchError, FetchedImage, HttpRemoteSource, RemoteSource};

const COPY_CHUNK: usize = 64 * 1024;

/// Errors raised while writing into the media store.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Failed to read {path}: {source}")]
    ReadSource { path: PathBuf, source: io::Error },
    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Result of mirroring one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorOutcome {
    pub asset: MirroredAsset,
    /// False when the destination already existed or the store is dry-run.
    pub written: bool,
}

/// Writable media root. A dry-run store computes assets but writes nothing.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    dry_run: bool,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            dry_run,
        }
    }

    /// Absolute location of an asset inside this store.
    pub fn absolute(&self, asset: &MirroredAsset) -> PathBuf {
        self.root.join(&asset.dest_path)
    }

    /// Asset a resolved uploads file maps to for `owner`. Writes nothing.
    pub fn plan(&self, resolved: &ResolvedFile, owner: UserId) -> MirroredAsset {
        let basename = resolved
            .abs_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        MirroredAsset {
            dest_path: dest_path_for(owner, &resolved.digest, &basename),
            digest: resolved.digest.clone(),
            owner_user: owner,
        }
    }

    /// Asset fetched bytes map to for `owner`, with the extension fixed from
    /// the content type or the bytes when the URL has none.
    pub fn plan_fetched(&self, url: &str, image: &FetchedImage, owner: UserId) -> MirroredAsset {
        let digest = digest::sha1_bytes(&image.bytes);
        let basename = remote_basename(url, image.content_type.as_deref(), &image.bytes);
        MirroredAsset {
            dest_path: dest_path_for(owner, &digest, &basename),
            digest,
            owner_user: owner,
        }
    }

    /// Mirror a resolved uploads file for `owner`.
    pub fn mirror(&self, resolved: &ResolvedFile, owner: UserId) -> Result<MirrorOutcome, MirrorError> {
        let asset = self.plan(resolved, owner);
        let written = self.write_if_absent(&asset, |tmp| {
            let mut source =
                fs::File::open(&resolved.abs_path).map_err(|source| MirrorError::ReadSource {
                    path: resolved.abs_path.clone(),
                    source,
                })?;
            let mut buffer = vec![0u8; COPY_CHUNK];
            loop {
                let read = source
                    .read(&mut buffer)
                    .map_err(|source| MirrorError::ReadSource {
                        path: resolved.abs_path.clone(),
                        source,
                    })?;
                if read == 0 {
                    return Ok(());
                }
                tmp.write_all(&buffer[..read])
                    .map_err(|source| MirrorError::Write {
                        path: tmp.path().to_path_buf(),
                        source,
                    })?;
            }
        })?;
        Ok(MirrorOutcome { asset, written })
    }

    /// Mirror bytes fetched from `url` for `owner`.
    pub fn mirror_fetched(
        &self,
        url: &str,
        image: &FetchedImage,
        owner: UserId,
    ) -> Result<MirrorOutcome, MirrorError> {
        let asset = self.plan_fetched(url, image, owner);
        let written = self.write_if_absent(&asset, |tmp| {
            tmp.write_all(&image.bytes).map_err(|source| MirrorError::Write {
                path: tmp.path().to_path_buf(),
                source,
            })
        })?;
        Ok(MirrorOutcome { asset, written })
    }

    fn write_if_absent(
        &self,
        asset: &MirroredAsset,
        fill: impl FnOnce(&mut NamedTempFile) -> Result<(), MirrorError>,
    ) -> Result<bool, MirrorError> {
        let dest = self.absolute(asset);
        if self.dry_run || dest.is_file() {
            return Ok(false);
        }
        let parent = dest.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(|source| MirrorError::CreateDir {
            path: parent.clone(),
            source,
        })?;
        let mut tmp = NamedTempFile::new_in(&parent).map_err(|source| MirrorError::Write {
            path: parent.clone(),
            source,
        })?;
        fill(&mut tmp)?;
        tmp.persist(&dest).map_err(|err| MirrorError::Write {
            path: dest.clone(),
            source: err.error,
        })?;
        debug!(dest = %dest.display(), "Mirrored image");
        Ok(true)
    }
}

/// Mirror one resolved file into `media_root`, writing only if absent.
pub fn mirror(
    resolved: &ResolvedFile,
    owner: UserId,
    media_root: &Path,
) -> Result<MirroredAsset, MirrorError> {
    MediaStore::new(media_root, false)
        .mirror(resolved, owner)
        .map(|outcome| outcome.asset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestCache;
    use tempfile::tempdir;

    #[test]
    fn mirror_writes_once_under_owner_namespace() {
        let uploads = tempdir().unwrap();
        let media = tempdir().unwrap();
        let source = uploads.path().join("My Pic.jpg");
        fs::write(&source, b"abc").unwrap();
        let resolved = DigestCache::new().resolve(&source).unwrap();

        let store = MediaStore::new(media.path(), false);
        let first = store.mirror(&resolved, UserId(7)).unwrap();
        assert!(first.written);
        assert_eq!(first.asset.dest_path, "user_7/a9993e364706_My_Pic.jpg");
        assert_eq!(fs::read(store.absolute(&first.asset)).unwrap(), b"abc");

        let second = store.mirror(&resolved, UserId(7)).unwrap();
        assert!(!second.written);
        assert_eq!(second.asset, first.asset);
        assert_eq!(mirror(&resolved, UserId(7), media.path()).unwrap(), first.asset);
    }

    #[test]
    fn dry_run_computes_the_same_asset_without_writing() {
        let uploads = tempdir().unwrap();
        let media = tempdir().unwrap();
        let source = uploads.path().join("a.png");
        fs::write(&source, b"abc").unwrap();
        let resolved = DigestCache::new().resolve(&source).unwrap();

        let dry = MediaStore::new(media.path(), true).mirror(&resolved, UserId(3)).unwrap();
        assert!(!dry.written);
        assert!(!media.path().join(&dry.asset.dest_path).exists());
        let real = MediaStore::new(media.path(), false).mirror(&resolved, UserId(3)).unwrap();
        assert_eq!(dry.asset, real.asset);
    }

    #[test]
    fn fetched_bytes_get_an_extension() {
        let media = tempdir().unwrap();
        let image = FetchedImage {
            bytes: b"GIF89a....".to_vec(),
            content_type: None,
        };
        let outcome = MediaStore::new(media.path(), false)
            .mirror_fetched("https://x.org/avatar/42", &image, UserId(42))
            .unwrap();
        assert!(outcome.written);
        assert!(outcome.asset.dest_path.starts_with("user_42/"));
        assert!(outcome.asset.dest_path.ends_with("_42.gif"));
    }
}
