use rusqlite::Connection;

use super::ImageStoreError;
use super::map_sql_error;

pub(super) fn apply_pragmas(connection: &Connection, in_memory: bool) -> Result<(), ImageStoreError> {
    let journal = if in_memory {
        "PRAGMA journal_mode=MEMORY;"
    } else {
        "PRAGMA journal_mode=WAL;"
    };
    connection
        .execute_batch(journal)
        .map_err(map_sql_error)?;
    connection
        .execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;
             PRAGMA temp_store=MEMORY;",
        )
        .map_err(map_sql_error)?;
    Ok(())
}

pub(super) fn apply_schema(connection: &Connection) -> Result<(), ImageStoreError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS profiles (
                user_id INTEGER PRIMARY KEY,
                primary_image TEXT,
                primary_digest TEXT
             );
             CREATE TABLE IF NOT EXISTS profile_images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                position INTEGER NOT NULL,
                image TEXT NOT NULL CHECK (image <> ''),
                digest TEXT NOT NULL,
                source_url TEXT,
                UNIQUE(user_id, kind, image)
             );
             CREATE INDEX IF NOT EXISTS idx_profile_images_user_kind_position
                ON profile_images (user_id, kind, position);
             CREATE INDEX IF NOT EXISTS idx_profile_images_digest
                ON profile_images (digest);
             CREATE TABLE IF NOT EXISTS retired_images (
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                digest TEXT NOT NULL,
                reason TEXT NOT NULL,
                PRIMARY KEY (user_id, kind, digest)
             ) WITHOUT ROWID;",
        )
        .map_err(map_sql_error)?;
    Ok(())
}
