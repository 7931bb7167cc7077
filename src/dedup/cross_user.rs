use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use crate::gallery::{Gallery, GalleryImage, RecordId};
use crate::model::{CollisionRecord, ImageKind, Sha1Hex, Tiebreak, UserId};
use crate::normalize::PrimaryPromotionPolicy;

use super::{DedupOutcome, REASON_CROSS_USER, REASON_PROMOTED};

/// Give every digest claimed by several users a single owner.
///
/// Claims and declared primaries are read from the snapshot before any
/// removal, so the outcome does not depend on processing order.
pub(super) fn resolve_collisions(gallery: &mut Gallery, outcome: &mut DedupOutcome) {
    let mut claims: BTreeMap<Sha1Hex, BTreeSet<UserId>> = BTreeMap::new();
    let mut declared: HashMap<UserId, Sha1Hex> = HashMap::new();
    for profile in gallery.profiles() {
        for image in &profile.images {
            claims
                .entry(image.digest().clone())
                .or_default()
                .insert(profile.user_id);
        }
        if let Some(primary) = &profile.primary {
            declared.insert(profile.user_id, primary.digest.clone());
        }
    }

    let mut lost_primary = BTreeSet::new();
    for (digest, claimants) in claims.into_iter().filter(|(_, users)| users.len() > 1) {
        let primary_claimants: Vec<UserId> = claimants
            .iter()
            .copied()
            .filter(|user| declared.get(user) == Some(&digest))
            .collect();
        let (owner, reason) = match primary_claimants.as_slice() {
            [only] => (*only, Tiebreak::PrimaryMatch),
            _ => match claimants.first() {
                Some(lowest) => (*lowest, Tiebreak::LowestUserId),
                None => continue,
            },
        };
        for loser in claimants.iter().copied().filter(|user| *user != owner) {
            let doomed: Vec<RecordId> = gallery
                .profile(loser)
                .map(|profile| {
                    profile
                        .images
                        .iter()
                        .filter(|image| *image.digest() == digest)
                        .map(|image| image.id)
                        .collect()
                })
                .unwrap_or_default();
            for id in doomed {
                if gallery.remove(loser, id, REASON_CROSS_USER).is_some() {
                    outcome.collision_removals += 1;
                }
            }
            if declared.get(&loser) == Some(&digest) {
                lost_primary.insert(loser);
            }
        }
        debug!(digest = %digest, owner = %owner, reason = reason.as_str(), "Resolved collision");
        outcome.collisions.push(CollisionRecord {
            digest,
            claimant_user_ids: claimants,
            resolved_owner: owner,
            reason,
        });
    }

    for user_id in lost_primary {
        reassign_primary(gallery, user_id, outcome);
    }
    if !outcome.collisions.is_empty() {
        info!(
            collisions = outcome.collisions.len(),
            removed = outcome.collision_removals,
            "Resolved cross-user collisions"
        );
    }
}

/// Point the primary at the first remaining `Public`, else promote the first
/// `Additional`, else clear it.
fn reassign_primary(gallery: &mut Gallery, user_id: UserId, outcome: &mut DedupOutcome) {
    let candidates: Vec<GalleryImage> = gallery
        .profile(user_id)
        .map(|profile| {
            ImageKind::ALL
                .iter()
                .flat_map(|kind| profile.ordered(*kind))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let policy = PrimaryPromotionPolicy::for_reassignment();
    let picked = policy
        .pick(&candidates, GalleryImage::kind)
        .map(|index| &candidates[index]);
    outcome.primary_fixes += 1;
    let Some(picked) = picked else {
        gallery.set_primary(user_id, None);
        return;
    };
    if picked.kind() != ImageKind::Public {
        gallery.change_kind(user_id, picked.id, ImageKind::Public, REASON_PROMOTED);
        outcome.promotions += 1;
    }
    gallery.set_primary(user_id, Some(picked.record.asset.clone()));
}
