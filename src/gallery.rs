//! In-memory gallery: the store snapshot plus everything planned this run.
//!
//! Dedup and slot assignment mutate a [`Gallery`]; the store is only touched
//! when [`GalleryChanges`] computed against the untouched baseline are applied.
//! A dry-run computes the same changes and drops them.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::model::{ImageKind, MirroredAsset, ProfileImageRecord, Sha1Hex, UserId};
use crate::store::{ImageStore, ImageStoreError, RetiredImage};

/// Identity of a gallery row: persisted, or planned in this run.
///
/// Stored rows order before pending ones, so older rows win ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    Stored(i64),
    Pending(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryImage {
    pub id: RecordId,
    pub record: ProfileImageRecord,
}

impl GalleryImage {
    pub fn kind(&self) -> ImageKind {
        self.record.kind
    }

    pub fn digest(&self) -> &Sha1Hex {
        &self.record.asset.digest
    }
}

/// One user's declared primary and gallery rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileState {
    pub user_id: UserId,
    pub primary: Option<MirroredAsset>,
    pub images: Vec<GalleryImage>,
    persisted: bool,
}

impl ProfileState {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            primary: None,
            images: Vec::new(),
            persisted: false,
        }
    }

    /// Rows of one kind ordered by position, then id.
    pub fn ordered(&self, kind: ImageKind) -> Vec<&GalleryImage> {
        let mut rows: Vec<&GalleryImage> =
            self.images.iter().filter(|image| image.kind() == kind).collect();
        rows.sort_by_key(|image| (image.record.position, image.id));
        rows
    }

    pub fn count(&self, kind: ImageKind) -> usize {
        self.images.iter().filter(|image| image.kind() == kind).count()
    }

    pub fn has_live(&self, kind: ImageKind, digest: &Sha1Hex) -> bool {
        self.images
            .iter()
            .any(|image| image.kind() == kind && image.digest() == digest)
    }

    fn has_stored(&self, kind: ImageKind, digest: &Sha1Hex) -> bool {
        self.images.iter().any(|image| {
            matches!(image.id, RecordId::Stored(_))
                && image.kind() == kind
                && image.digest() == digest
        })
    }

    fn next_position(&self, kind: ImageKind) -> u32 {
        self.images
            .iter()
            .filter(|image| image.kind() == kind)
            .map(|image| image.record.position + 1)
            .max()
            .unwrap_or_else(|| kind.first_position())
    }

    fn find_mut(&mut self, id: RecordId) -> Option<&mut GalleryImage> {
        self.images.iter_mut().find(|image| image.id == id)
    }
}

/// What happened to a staged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Added(RecordId),
    /// The store already holds this (user, kind, digest).
    AlreadyStored,
    /// An earlier run removed this (user, kind, digest).
    Retired,
}

#[derive(Debug, Clone, Default)]
pub struct Gallery {
    profiles: BTreeMap<UserId, ProfileState>,
    retired: HashSet<(UserId, ImageKind, Sha1Hex)>,
    removed: Vec<RetiredImage>,
    next_pending: usize,
}

impl Gallery {
    /// Load the current store contents.
    pub fn from_store(store: &ImageStore) -> Result<Self, ImageStoreError> {
        let mut gallery = Self::default();
        for profile in store.list_profiles()? {
            let state = gallery.profile_entry(profile.user_id);
            state.primary = profile.primary;
            state.persisted = true;
        }
        for stored in store.list_images()? {
            let state = gallery.profile_entry(stored.record.profile_id);
            state.images.push(GalleryImage {
                id: RecordId::Stored(stored.id),
                record: stored.record,
            });
        }
        gallery.retired = store
            .list_retired()?
            .into_iter()
            .map(|retired| (retired.user_id, retired.kind, retired.digest))
            .collect();
        debug!(
            profiles = gallery.profiles.len(),
            retired = gallery.retired.len(),
            "Loaded gallery snapshot"
        );
        Ok(gallery)
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.profiles.keys().copied().collect()
    }

    pub fn profile(&self, user_id: UserId) -> Option<&ProfileState> {
        self.profiles.get(&user_id)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &ProfileState> {
        self.profiles.values()
    }

    pub fn is_retired(&self, user_id: UserId, kind: ImageKind, digest: &Sha1Hex) -> bool {
        self.retired.contains(&(user_id, kind, digest.clone()))
    }

    /// Plan a new gallery row unless the store already has or retired it.
    ///
    /// The first staged `Public` row becomes the primary of a profile that has
    /// none.
    pub fn stage(
        &mut self,
        kind: ImageKind,
        asset: MirroredAsset,
        source_url: Option<String>,
    ) -> StageOutcome {
        let user_id = asset.owner_user;
        if self.is_retired(user_id, kind, &asset.digest) {
            return StageOutcome::Retired;
        }
        let id = RecordId::Pending(self.next_pending);
        let state = self.profile_entry(user_id);
        if state.has_stored(kind, &asset.digest) {
            return StageOutcome::AlreadyStored;
        }
        if kind == ImageKind::Public && state.primary.is_none() {
            state.primary = Some(asset.clone());
        }
        let position = state.next_position(kind);
        state.images.push(GalleryImage {
            id,
            record: ProfileImageRecord {
                profile_id: user_id,
                kind,
                position,
                asset,
                source_url,
            },
        });
        self.next_pending += 1;
        StageOutcome::Added(id)
    }

    /// Drop a row and remember its triple for the retirement ledger.
    pub fn remove(&mut self, user_id: UserId, id: RecordId, reason: &str) -> Option<GalleryImage> {
        let state = self.profiles.get_mut(&user_id)?;
        let index = state.images.iter().position(|image| image.id == id)?;
        let removed = state.images.remove(index);
        self.removed.push(RetiredImage {
            user_id,
            kind: removed.kind(),
            digest: removed.digest().clone(),
            reason: reason.to_string(),
        });
        Some(removed)
    }

    /// Move a row to another kind at the end of that kind's run.
    pub fn change_kind(&mut self, user_id: UserId, id: RecordId, kind: ImageKind, reason: &str) {
        let Some(state) = self.profiles.get_mut(&user_id) else {
            return;
        };
        let position = state.next_position(kind);
        let Some(image) = state.find_mut(id) else {
            return;
        };
        if image.record.kind == kind {
            return;
        }
        self.removed.push(RetiredImage {
            user_id,
            kind: image.record.kind,
            digest: image.record.asset.digest.clone(),
            reason: reason.to_string(),
        });
        image.record.kind = kind;
        image.record.position = position;
    }

    /// Drop the pending rows planned onto `dest_path` without retiring them.
    ///
    /// Ledger entries for the same content go too once the user keeps no live
    /// copy of it, so a later run stages that content again.
    pub fn discard_pending(&mut self, user_id: UserId, dest_path: &str) -> usize {
        let Some(state) = self.profiles.get_mut(&user_id) else {
            return 0;
        };
        let mut dropped: Vec<Sha1Hex> = Vec::new();
        state.images.retain(|image| {
            let planned_here = matches!(image.id, RecordId::Pending(_))
                && image.record.asset.dest_path == dest_path;
            if planned_here {
                dropped.push(image.digest().clone());
            }
            !planned_here
        });
        if state
            .primary
            .as_ref()
            .is_some_and(|primary| primary.dest_path == dest_path)
        {
            state.primary = None;
        }
        self.removed.retain(|retired| {
            retired.user_id != user_id
                || !dropped.contains(&retired.digest)
                || state.images.iter().any(|image| *image.digest() == retired.digest)
        });
        dropped.len()
    }

    pub fn set_position(&mut self, user_id: UserId, id: RecordId, position: u32) {
        if let Some(image) = self
            .profiles
            .get_mut(&user_id)
            .and_then(|state| state.find_mut(id))
        {
            image.record.position = position;
        }
    }

    pub fn set_primary(&mut self, user_id: UserId, primary: Option<MirroredAsset>) {
        self.profile_entry(user_id).primary = primary;
    }

    /// Store mutations that turn `baseline` into this gallery.
    pub fn diff(&self, baseline: &Gallery) -> GalleryChanges {
        let mut changes = GalleryChanges::default();
        let live_stored: HashSet<RecordId> = self
            .profiles
            .values()
            .flat_map(|state| state.images.iter().map(|image| image.id))
            .collect();
        for state in baseline.profiles.values() {
            for image in &state.images {
                if let RecordId::Stored(id) = image.id
                    && !live_stored.contains(&image.id)
                {
                    changes.deletes.push(id);
                }
            }
        }
        for state in self.profiles.values() {
            let before = baseline.profiles.get(&state.user_id);
            for image in &state.images {
                match image.id {
                    RecordId::Pending(_) => changes.inserts.push(image.record.clone()),
                    RecordId::Stored(id) => {
                        let old = before.and_then(|old| {
                            old.images.iter().find(|candidate| candidate.id == image.id)
                        });
                        let moved = old.is_none_or(|old| {
                            old.record.kind != image.record.kind
                                || old.record.position != image.record.position
                        });
                        if moved {
                            changes.updates.push(ImageUpdate {
                                id,
                                kind: image.record.kind,
                                position: image.record.position,
                            });
                        }
                    }
                }
            }
            let needs_row = !state.persisted && (state.primary.is_some() || !state.images.is_empty());
            let primary_changed = before.is_some_and(|old| old.primary != state.primary);
            if needs_row || (state.persisted && primary_changed) {
                changes.primary_updates.push(PrimaryUpdate {
                    user_id: state.user_id,
                    primary: state.primary.clone(),
                });
            }
        }
        let mut seen = BTreeSet::new();
        for retired in &self.removed {
            let key = (retired.user_id, retired.kind, retired.digest.clone());
            let still_live = self
                .profiles
                .get(&retired.user_id)
                .is_some_and(|state| state.has_live(retired.kind, &retired.digest));
            if still_live || self.retired.contains(&key) || !seen.insert(key) {
                continue;
            }
            changes.retirements.push(retired.clone());
        }
        changes.deletes.sort_unstable();
        changes.updates.sort_by_key(|update| update.id);
        changes
    }

    fn profile_entry(&mut self, user_id: UserId) -> &mut ProfileState {
        self.profiles
            .entry(user_id)
            .or_insert_with(|| ProfileState::new(user_id))
    }
}

/// A stored row moved to another kind or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageUpdate {
    pub id: i64,
    pub kind: ImageKind,
    pub position: u32,
}

/// A profile row to create or whose primary changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryUpdate {
    pub user_id: UserId,
    pub primary: Option<MirroredAsset>,
}

/// Planned store mutations for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GalleryChanges {
    pub inserts: Vec<ProfileImageRecord>,
    pub deletes: Vec<i64>,
    pub updates: Vec<ImageUpdate>,
    pub primary_updates: Vec<PrimaryUpdate>,
    pub retirements: Vec<RetiredImage>,
}

impl GalleryChanges {
    pub fn is_empty(&self) -> bool {
        self.write_count() == 0
    }

    /// Number of row writes these changes perform.
    pub fn write_count(&self) -> usize {
        self.inserts.len()
            + self.deletes.len()
            + self.updates.len()
            + self.primary_updates.len()
            + self.retirements.len()
    }

    /// Apply every change in one transaction.
    pub fn apply(&self, store: &ImageStore) -> Result<(), ImageStoreError> {
        let mut batch = store.write_batch()?;
        for id in &self.deletes {
            batch.delete_image(*id)?;
        }
        for update in &self.updates {
            batch.update_image(update.id, update.kind, update.position)?;
        }
        for record in &self.inserts {
            batch.insert_image(record)?;
        }
        for update in &self.primary_updates {
            batch.upsert_profile(update.user_id, update.primary.as_ref())?;
        }
        for retired in &self.retirements {
            batch.retire(retired.user_id, retired.kind, &retired.digest, &retired.reason)?;
        }
        batch.commit()
    }
}
