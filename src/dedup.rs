//! Content dedup and cross-user collision resolution.
//!
//! The cross-user pass runs first so that a primary reassigned to a loser's
//! next image is itself checked by the within-user pass. Users that came in
//! without any profile image get one promoted last, so a promoted image never
//! counts as a declared primary when ownership is decided.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gallery::{Gallery, GalleryImage};
use crate::model::{CollisionRecord, ImageKind, Sha1Hex, UserId};
use crate::normalize::PrimaryPromotionPolicy;

mod cross_user;
mod within_user;

pub const REASON_DUPLICATE_IN_KIND: &str = "duplicate_in_kind";
pub const REASON_DUPLICATE_IN_GALLERY: &str = "duplicate_in_gallery";
pub const REASON_AVATAR_IN_ADDITIONAL: &str = "avatar_in_additional";
pub const REASON_CROSS_USER: &str = "cross_user_collision";
pub const REASON_PROMOTED: &str = "promoted_to_primary";

/// How aggressively within-user duplicates are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// Duplicates within one kind, plus additional copies of the primary.
    #[default]
    PerKind,
    /// Any repeated content across the whole gallery, by kind priority.
    AnyDuplicate,
}

impl DedupMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DedupMode::PerKind => "per_kind",
            DedupMode::AnyDuplicate => "any_duplicate",
        }
    }
}

/// Within-user removals aggregated per (user, digest, reason).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRemoval {
    pub user_id: UserId,
    pub digest: Sha1Hex,
    pub removed_count: usize,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    pub removals: Vec<DuplicateRemoval>,
    pub collisions: Vec<CollisionRecord>,
    /// Records dropped from losing claimants.
    pub collision_removals: usize,
    /// Primaries reassigned or cleared after a collision.
    pub primary_fixes: usize,
    /// Additional images moved to `Public` to become a primary.
    pub promotions: usize,
    /// Users without any profile image that got one from their other kinds.
    pub input_promotions: usize,
}

impl DedupOutcome {
    pub fn removed_records(&self) -> usize {
        self.collision_removals
            + self
                .removals
                .iter()
                .map(|removal| removal.removed_count)
                .sum::<usize>()
    }
}

/// Run both passes to completion over every profile in the gallery.
pub fn resolve(gallery: &mut Gallery, mode: DedupMode) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    let unclaimed: Vec<UserId> = gallery
        .profiles()
        .filter(|profile| profile.primary.is_none())
        .map(|profile| profile.user_id)
        .collect();
    cross_user::resolve_collisions(gallery, &mut outcome);
    let mut counts: BTreeMap<(UserId, Sha1Hex, &'static str), usize> = BTreeMap::new();
    within_user::dedup_profiles(gallery, mode, &mut counts);
    outcome.removals = counts
        .into_iter()
        .map(|((user_id, digest, reason), removed_count)| DuplicateRemoval {
            user_id,
            digest,
            removed_count,
            reason,
        })
        .collect();
    outcome.input_promotions = promote_unclaimed(gallery, &unclaimed);
    tracing::info!(
        collisions = outcome.collisions.len(),
        removed = outcome.removed_records(),
        primary_fixes = outcome.primary_fixes,
        input_promotions = outcome.input_promotions,
        "Dedup finished"
    );
    outcome
}

/// Give each of `users` still lacking a `Public` row one, picked from what
/// survived dedup by [`PrimaryPromotionPolicy::for_inputs`].
fn promote_unclaimed(gallery: &mut Gallery, users: &[UserId]) -> usize {
    let policy = PrimaryPromotionPolicy::for_inputs();
    let mut promoted = 0;
    for user_id in users.iter().copied() {
        let Some(profile) = gallery.profile(user_id) else {
            continue;
        };
        if profile.primary.is_some() || profile.count(ImageKind::Public) > 0 {
            continue;
        }
        let candidates: Vec<GalleryImage> = ImageKind::ALL
            .iter()
            .flat_map(|kind| profile.ordered(*kind))
            .cloned()
            .collect();
        let Some(picked) = policy
            .pick(&candidates, GalleryImage::kind)
            .map(|index| candidates[index].clone())
        else {
            continue;
        };
        gallery.change_kind(user_id, picked.id, ImageKind::Public, REASON_PROMOTED);
        gallery.set_primary(user_id, Some(picked.record.asset));
        promoted += 1;
    }
    promoted
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::digest::sha1_bytes;
    use crate::gallery::Gallery;
    use crate::model::{ImageKind, MirroredAsset, UserId};

    /// Asset whose digest depends only on `content`.
    pub fn asset(user: i64, content: &str, name: &str) -> MirroredAsset {
        let digest = sha1_bytes(content.as_bytes());
        MirroredAsset {
            dest_path: format!("user_{user}/{}_{name}", digest.short()),
            digest,
            owner_user: UserId(user),
        }
    }

    pub fn stage(gallery: &mut Gallery, user: i64, kind: ImageKind, content: &str) {
        gallery.stage(kind, asset(user, content, &format!("{content}.jpg")), None);
    }

    pub fn contents(gallery: &Gallery, user: i64, kind: ImageKind) -> Vec<String> {
        gallery
            .profile(UserId(user))
            .map(|profile| {
                profile
                    .ordered(kind)
                    .iter()
                    .map(|image| {
                        image
                            .record
                            .asset
                            .dest_path
                            .rsplit('_')
                            .next()
                            .unwrap_or_default()
                            .trim_end_matches(".jpg")
                            .to_string()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{asset, contents, stage};
    use super::*;
    use crate::model::Tiebreak;

    #[test]
    fn second_pass_over_resolved_state_changes_nothing() {
        let mut gallery = Gallery::default();
        stage(&mut gallery, 3, ImageKind::Additional, "h1");
        stage(&mut gallery, 7, ImageKind::Public, "h1");
        stage(&mut gallery, 7, ImageKind::Additional, "h1");
        stage(&mut gallery, 7, ImageKind::Additional, "b");
        stage(&mut gallery, 7, ImageKind::Additional, "b");

        let first = resolve(&mut gallery, DedupMode::PerKind);
        assert_eq!(first.collisions.len(), 1);
        assert_eq!(first.collisions[0].resolved_owner, UserId(7));
        assert_eq!(first.collisions[0].reason, Tiebreak::PrimaryMatch);
        assert_eq!(contents(&gallery, 7, ImageKind::Additional), vec!["b"]);

        let second = resolve(&mut gallery, DedupMode::PerKind);
        assert_eq!(second, DedupOutcome::default());
    }

    #[test]
    fn promoted_image_does_not_claim_ownership() {
        let mut gallery = Gallery::default();
        stage(&mut gallery, 3, ImageKind::Additional, "h1");
        stage(&mut gallery, 7, ImageKind::Public, "h1");
        stage(&mut gallery, 9, ImageKind::Private, "p");
        stage(&mut gallery, 9, ImageKind::Additional, "a");

        let outcome = resolve(&mut gallery, DedupMode::PerKind);
        assert_eq!(outcome.collisions[0].resolved_owner, UserId(7));
        assert_eq!(outcome.collisions[0].reason, Tiebreak::PrimaryMatch);
        assert_eq!(outcome.input_promotions, 1);
        assert!(gallery.profile(UserId(3)).unwrap().images.is_empty());
        assert_eq!(gallery.profile(UserId(3)).unwrap().primary, None);
        assert_eq!(contents(&gallery, 9, ImageKind::Public), vec!["a"]);
        assert_eq!(contents(&gallery, 9, ImageKind::Private), vec!["p"]);
        assert_eq!(
            gallery.profile(UserId(9)).unwrap().primary,
            Some(asset(9, "a", "a.jpg"))
        );
    }

    #[test]
    fn collision_loser_is_not_promoted_from_private() {
        let mut gallery = Gallery::default();
        stage(&mut gallery, 5, ImageKind::Public, "h3");
        stage(&mut gallery, 5, ImageKind::Private, "p");
        stage(&mut gallery, 2, ImageKind::Public, "h3");
        let outcome = resolve(&mut gallery, DedupMode::PerKind);
        assert_eq!(outcome.collisions[0].resolved_owner, UserId(2));
        assert_eq!(outcome.input_promotions, 0);
        assert_eq!(gallery.profile(UserId(5)).unwrap().primary, None);
        assert_eq!(contents(&gallery, 5, ImageKind::Private), vec!["p"]);
    }
}
