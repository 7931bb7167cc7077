//! Slot assignment: contiguous positions per (profile, kind) and the
//! primary-image invariants.

use serde::Serialize;
use tracing::debug;

use crate::gallery::{Gallery, RecordId};
use crate::model::{ImageKind, UserId};

/// Counters of one slot pass. Only stored rows count as position writes;
/// pending rows are inserted with their final position anyway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotPlan {
    pub position_changes: usize,
    pub primary_syncs: usize,
}

/// Renumber every profile: `Public` from 0, the other kinds from 1, keeping
/// relative order. Then point the primary at `Public` position 0.
pub fn assign_slots(gallery: &mut Gallery) -> SlotPlan {
    let mut plan = SlotPlan::default();
    for user_id in gallery.user_ids() {
        for kind in ImageKind::ALL {
            let moves: Vec<(RecordId, u32)> = match gallery.profile(user_id) {
                Some(profile) => profile
                    .ordered(kind)
                    .iter()
                    .zip(kind.first_position()..)
                    .filter(|(image, position)| image.record.position != *position)
                    .map(|(image, position)| (image.id, position))
                    .collect(),
                None => continue,
            };
            for (id, position) in moves {
                if matches!(id, RecordId::Stored(_)) {
                    plan.position_changes += 1;
                }
                gallery.set_position(user_id, id, position);
            }
        }
        if sync_primary(gallery, user_id) {
            plan.primary_syncs += 1;
        }
    }
    debug!(
        position_changes = plan.position_changes,
        primary_syncs = plan.primary_syncs,
        "Assigned slots"
    );
    plan
}

fn sync_primary(gallery: &mut Gallery, user_id: UserId) -> bool {
    let Some(profile) = gallery.profile(user_id) else {
        return false;
    };
    let head = profile
        .ordered(ImageKind::Public)
        .first()
        .map(|image| image.record.asset.clone());
    if profile.primary == head {
        return false;
    }
    gallery.set_primary(user_id, head);
    true
}

/// A broken slot invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotViolation {
    pub user_id: UserId,
    pub kind: ImageKind,
    pub detail: String,
}

/// Check position contiguity, primary consistency and per-kind uniqueness.
pub fn verify_invariants(gallery: &Gallery) -> Vec<SlotViolation> {
    let mut violations = Vec::new();
    for profile in gallery.profiles() {
        for kind in ImageKind::ALL {
            let rows = profile.ordered(kind);
            let positions: Vec<u32> = rows.iter().map(|image| image.record.position).collect();
            let expected: Vec<u32> = (kind.first_position()..)
                .take(positions.len())
                .collect();
            if positions != expected {
                violations.push(SlotViolation {
                    user_id: profile.user_id,
                    kind,
                    detail: format!("positions {positions:?}, expected {expected:?}"),
                });
            }
            let mut digests: Vec<_> = rows.iter().map(|image| image.digest()).collect();
            digests.sort();
            digests.dedup();
            if digests.len() != rows.len() {
                violations.push(SlotViolation {
                    user_id: profile.user_id,
                    kind,
                    detail: "duplicate content".to_string(),
                });
            }
        }
        let head = profile
            .ordered(ImageKind::Public)
            .first()
            .map(|image| &image.record.asset);
        if profile.primary.as_ref() != head {
            violations.push(SlotViolation {
                user_id: profile.user_id,
                kind: ImageKind::Public,
                detail: "primary does not match public position 0".to_string(),
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::test_support::{asset, stage};
    use crate::store::ImageStore;

    #[test]
    fn renumbers_after_removal_and_counts_only_stored_moves() {
        let store = ImageStore::open_in_memory().unwrap();
        let mut seed = Gallery::default();
        for content in ["a", "b", "c"] {
            stage(&mut seed, 12, ImageKind::Additional, content);
        }
        seed.diff(&Gallery::default()).apply(&store).unwrap();

        let baseline = Gallery::from_store(&store).unwrap();
        let mut gallery = baseline.clone();
        let first = gallery.profile(UserId(12)).unwrap().ordered(ImageKind::Additional)[0].id;
        gallery.remove(UserId(12), first, "avatar_in_additional");
        stage(&mut gallery, 12, ImageKind::Additional, "d");

        let plan = assign_slots(&mut gallery);
        assert_eq!(plan.position_changes, 2);
        let positions: Vec<u32> = gallery
            .profile(UserId(12))
            .unwrap()
            .ordered(ImageKind::Additional)
            .iter()
            .map(|image| image.record.position)
            .collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(verify_invariants(&gallery).is_empty());

        let changes = gallery.diff(&baseline);
        assert_eq!(changes.updates.len(), 2);
        assert_eq!(changes.inserts[0].position, 3);
    }

    #[test]
    fn public_starts_at_zero_and_primary_follows_it() {
        let mut gallery = Gallery::default();
        stage(&mut gallery, 1, ImageKind::Public, "a");
        stage(&mut gallery, 1, ImageKind::Public, "b");
        gallery.set_primary(UserId(1), Some(asset(1, "b", "b.jpg")));
        let plan = assign_slots(&mut gallery);
        assert_eq!(plan.primary_syncs, 1);
        assert_eq!(
            gallery.profile(UserId(1)).unwrap().primary,
            Some(asset(1, "a", "a.jpg"))
        );
        assert!(verify_invariants(&gallery).is_empty());
        assert_eq!(assign_slots(&mut gallery), SlotPlan::default());
    }
}
