use rusqlite::params;

use crate::model::{ImageKind, MirroredAsset, ProfileImageRecord, Sha1Hex, UserId};

use super::{ImageStoreError, ImageStoreWriteBatch, map_sql_error};

impl<'conn> ImageStoreWriteBatch<'conn> {
    /// Create the profile row if needed and set its primary image.
    pub fn upsert_profile(
        &mut self,
        user_id: UserId,
        primary: Option<&MirroredAsset>,
    ) -> Result<(), ImageStoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO profiles (user_id, primary_image, primary_digest)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET primary_image = excluded.primary_image,
                                                    primary_digest = excluded.primary_digest",
            )
            .map_err(map_sql_error)?
            .execute(params![
                user_id.get(),
                primary.map(|asset| asset.dest_path.as_str()),
                primary.map(|asset| asset.digest.as_str()),
            ])
            .map_err(map_sql_error)?;
        Ok(())
    }

    /// Insert a gallery row and return its id.
    pub fn insert_image(&mut self, record: &ProfileImageRecord) -> Result<i64, ImageStoreError> {
        self.tx
            .prepare_cached(
                "INSERT INTO profile_images (user_id, kind, position, image, digest, source_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(map_sql_error)?
            .execute(params![
                record.profile_id.get(),
                record.kind.as_str(),
                i64::from(record.position),
                record.asset.dest_path,
                record.asset.digest.as_str(),
                record.source_url,
            ])
            .map_err(map_sql_error)?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Move a gallery row to another kind and/or position.
    pub fn update_image(
        &mut self,
        id: i64,
        kind: ImageKind,
        position: u32,
    ) -> Result<(), ImageStoreError> {
        self.tx
            .prepare_cached("UPDATE profile_images SET kind = ?2, position = ?3 WHERE id = ?1")
            .map_err(map_sql_error)?
            .execute(params![id, kind.as_str(), i64::from(position)])
            .map_err(map_sql_error)?;
        Ok(())
    }

    pub fn delete_image(&mut self, id: i64) -> Result<(), ImageStoreError> {
        self.tx
            .prepare_cached("DELETE FROM profile_images WHERE id = ?1")
            .map_err(map_sql_error)?
            .execute(params![id])
            .map_err(map_sql_error)?;
        Ok(())
    }

    /// Record a removed triple. The first recorded reason is kept.
    pub fn retire(
        &mut self,
        user_id: UserId,
        kind: ImageKind,
        digest: &Sha1Hex,
        reason: &str,
    ) -> Result<(), ImageStoreError> {
        self.tx
            .prepare_cached(
                "INSERT OR IGNORE INTO retired_images (user_id, kind, digest, reason)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(map_sql_error)?
            .execute(params![user_id.get(), kind.as_str(), digest.as_str(), reason])
            .map_err(map_sql_error)?;
        Ok(())
    }

    /// Commit all batched writes.
    pub fn commit(self) -> Result<(), ImageStoreError> {
        self.tx.commit().map_err(map_sql_error)
    }
}
