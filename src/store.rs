//! SQLite persistence for profiles, their gallery rows, and the ledger of
//! retired (user, kind, digest) triples.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, Transaction};
use thiserror::Error;

use crate::model::{ImageKind, MirroredAsset, ProfileImageRecord, Sha1Hex, UserId};

mod schema;
mod write;

/// Errors returned by the image store.
#[derive(Debug, Error)]
pub enum ImageStoreError {
    /// SQLite query failed.
    #[error("Database query failed: {0}")]
    Sql(#[from] rusqlite::Error),
    /// Failed to create the database's parent directory.
    #[error("Could not write to {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Database is locked or busy.
    #[error("Database is busy, please retry")]
    Busy,
    /// A stored row does not decode into a typed record.
    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

/// Persisted gallery row with its database id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub id: i64,
    pub record: ProfileImageRecord,
}

/// Persisted profile with its declared primary image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredProfile {
    pub user_id: UserId,
    pub primary: Option<MirroredAsset>,
}

/// A (user, kind, digest) removed by dedup or collision resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RetiredImage {
    pub user_id: UserId,
    pub kind: ImageKind,
    pub digest: Sha1Hex,
    pub reason: String,
}

/// SQLite wrapper for the canonical image tables.
pub struct ImageStore {
    connection: Connection,
}

/// Groups the mutations of one run into a single transaction.
pub struct ImageStoreWriteBatch<'conn> {
    tx: Transaction<'conn>,
}

impl ImageStore {
    /// Open (or create) the database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|source| ImageStoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let connection = Connection::open(path).map_err(map_sql_error)?;
        schema::apply_pragmas(&connection, false)?;
        schema::apply_schema(&connection)?;
        Ok(Self { connection })
    }

    /// Open a throwaway database, used by dry-runs without a file and by tests.
    pub fn open_in_memory() -> Result<Self, ImageStoreError> {
        let connection = Connection::open_in_memory().map_err(map_sql_error)?;
        schema::apply_pragmas(&connection, true)?;
        schema::apply_schema(&connection)?;
        Ok(Self { connection })
    }

    /// All profiles ordered by user id.
    pub fn list_profiles(&self) -> Result<Vec<StoredProfile>, ImageStoreError> {
        let mut stmt = self
            .connection
            .prepare(
                "SELECT user_id, primary_image, primary_digest FROM profiles ORDER BY user_id ASC",
            )
            .map_err(map_sql_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(map_sql_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_error)?;
        rows.into_iter()
            .map(|(user_id, image, digest)| {
                let user_id = UserId(user_id);
                let primary = match (image, digest) {
                    (Some(dest_path), Some(digest)) if !dest_path.is_empty() => {
                        Some(MirroredAsset {
                            dest_path,
                            digest: parse_digest("profiles", &digest)?,
                            owner_user: user_id,
                        })
                    }
                    _ => None,
                };
                Ok(StoredProfile { user_id, primary })
            })
            .collect()
    }

    /// All gallery rows ordered by user, kind, position, then id.
    pub fn list_images(&self) -> Result<Vec<StoredImage>, ImageStoreError> {
        let mut stmt = self
            .connection
            .prepare(
                "SELECT id, user_id, kind, position, image, digest, source_url
                 FROM profile_images
                 ORDER BY user_id ASC, kind ASC, position ASC, id ASC",
            )
            .map_err(map_sql_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .map_err(map_sql_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_error)?;
        let mut images = rows
            .into_iter()
            .map(|(id, user_id, kind, position, image, digest, source_url)| {
                let user_id = UserId(user_id);
                Ok(StoredImage {
                    id,
                    record: ProfileImageRecord {
                        profile_id: user_id,
                        kind: parse_kind("profile_images", &kind)?,
                        position: u32::try_from(position).map_err(|_| ImageStoreError::Corrupt {
                            table: "profile_images",
                            detail: format!("position {position} for row {id}"),
                        })?,
                        asset: MirroredAsset {
                            dest_path: image,
                            digest: parse_digest("profile_images", &digest)?,
                            owner_user: user_id,
                        },
                        source_url,
                    },
                })
            })
            .collect::<Result<Vec<_>, ImageStoreError>>()?;
        images.sort_by_key(|image| {
            (
                image.record.profile_id,
                image.record.kind,
                image.record.position,
                image.id,
            )
        });
        Ok(images)
    }

    /// Every retired triple.
    pub fn list_retired(&self) -> Result<Vec<RetiredImage>, ImageStoreError> {
        let mut stmt = self
            .connection
            .prepare(
                "SELECT user_id, kind, digest, reason FROM retired_images
                 ORDER BY user_id ASC, kind ASC, digest ASC",
            )
            .map_err(map_sql_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(map_sql_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_error)?;
        rows.into_iter()
            .map(|(user_id, kind, digest, reason)| {
                Ok(RetiredImage {
                    user_id: UserId(user_id),
                    kind: parse_kind("retired_images", &kind)?,
                    digest: parse_digest("retired_images", &digest)?,
                    reason,
                })
            })
            .collect()
    }

    /// Start a write batch that wraps related mutations in a single transaction.
    pub fn write_batch(&self) -> Result<ImageStoreWriteBatch<'_>, ImageStoreError> {
        let tx = self
            .connection
            .unchecked_transaction()
            .map_err(map_sql_error)?;
        Ok(ImageStoreWriteBatch { tx })
    }
}

/// Translate rusqlite errors into friendlier variants.
pub(crate) fn map_sql_error(err: rusqlite::Error) -> ImageStoreError {
    match err {
        rusqlite::Error::SqliteFailure(sql_err, _)
            if sql_err.code == rusqlite::ErrorCode::DatabaseBusy =>
        {
            ImageStoreError::Busy
        }
        other => ImageStoreError::Sql(other),
    }
}

fn parse_kind(table: &'static str, value: &str) -> Result<ImageKind, ImageStoreError> {
    ImageKind::parse(value).ok_or_else(|| ImageStoreError::Corrupt {
        table,
        detail: format!("unknown kind {value:?}"),
    })
}

fn parse_digest(table: &'static str, value: &str) -> Result<Sha1Hex, ImageStoreError> {
    Sha1Hex::parse(value).ok_or_else(|| ImageStoreError::Corrupt {
        table,
        detail: format!("bad digest {value:?}"),
    })
}
