use std::collections::{BTreeMap, HashSet};

use crate::gallery::{Gallery, RecordId};
use crate::model::{ImageKind, Sha1Hex, UserId};

use super::{
    DedupMode, REASON_AVATAR_IN_ADDITIONAL, REASON_DUPLICATE_IN_GALLERY, REASON_DUPLICATE_IN_KIND,
};

type RemovalCounts = BTreeMap<(UserId, Sha1Hex, &'static str), usize>;

pub(super) fn dedup_profiles(gallery: &mut Gallery, mode: DedupMode, counts: &mut RemovalCounts) {
    for user_id in gallery.user_ids() {
        remove_avatar_copies(gallery, user_id, counts);
        match mode {
            DedupMode::PerKind => {
                for kind in ImageKind::ALL {
                    keep_first(gallery, user_id, &[kind], REASON_DUPLICATE_IN_KIND, counts);
                }
            }
            DedupMode::AnyDuplicate => {
                keep_first(
                    gallery,
                    user_id,
                    &ImageKind::ALL,
                    REASON_DUPLICATE_IN_GALLERY,
                    counts,
                );
            }
        }
    }
}

/// `Additional` rows carrying the primary image's content.
fn remove_avatar_copies(gallery: &mut Gallery, user_id: UserId, counts: &mut RemovalCounts) {
    let Some(profile) = gallery.profile(user_id) else {
        return;
    };
    let primary_digest = profile
        .primary
        .as_ref()
        .map(|primary| primary.digest.clone())
        .or_else(|| {
            profile
                .ordered(ImageKind::Public)
                .first()
                .map(|image| image.digest().clone())
        });
    let Some(primary_digest) = primary_digest else {
        return;
    };
    let doomed: Vec<RecordId> = profile
        .ordered(ImageKind::Additional)
        .iter()
        .filter(|image| *image.digest() == primary_digest)
        .map(|image| image.id)
        .collect();
    for id in doomed {
        if gallery.remove(user_id, id, REASON_AVATAR_IN_ADDITIONAL).is_some() {
            *counts
                .entry((user_id, primary_digest.clone(), REASON_AVATAR_IN_ADDITIONAL))
                .or_default() += 1;
        }
    }
}

/// Keep the first row per digest over `kinds` in priority order, then
/// position; remove the rest.
fn keep_first(
    gallery: &mut Gallery,
    user_id: UserId,
    kinds: &[ImageKind],
    reason: &'static str,
    counts: &mut RemovalCounts,
) {
    let Some(profile) = gallery.profile(user_id) else {
        return;
    };
    let mut seen = HashSet::new();
    let mut doomed = Vec::new();
    for kind in kinds {
        for image in profile.ordered(*kind) {
            if !seen.insert(image.digest().clone()) {
                doomed.push((image.id, image.digest().clone()));
            }
        }
    }
    for (id, digest) in doomed {
        if gallery.remove(user_id, id, reason).is_some() {
            *counts.entry((user_id, digest, reason)).or_default() += 1;
        }
    }
}
