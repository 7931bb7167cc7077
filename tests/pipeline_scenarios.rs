mod support;

use imgrecon::dedup::DedupMode;
use imgrecon::digest::sha1_bytes;
use imgrecon::model::{ImageKind, UserId};
use imgrecon::pipeline::{PipelineOptions, RunSummary};
use imgrecon::store::ImageStore;
use support::Fixture;

const USERS_CSV: &str = "\
user_id,profile_image,additional_images
3,/wp-content/uploads/2020/01/own3.jpg,https://old.example/wp-content/uploads/a.jpg
7,uploads/a.jpg,
12,face.png,x1.png; face.png; x2.png
30,gone.jpg,
";

fn seed(fixture: &Fixture) {
    fixture.write_upload("a.jpg", b"shared avatar");
    fixture.write_upload("2020/01/own3.jpg", b"user three");
    fixture.write_upload("face.png", b"user twelve face");
    fixture.write_upload("x1.png", b"extra one");
    fixture.write_upload("x2.png", b"extra two");
}

fn change_counters(summary: &RunSummary) -> [usize; 11] {
    [
        summary.staged,
        summary.collisions,
        summary.duplicates_removed,
        summary.primary_fixes,
        summary.position_changes,
        summary.inserts,
        summary.deletes,
        summary.updates,
        summary.profile_updates,
        summary.retirements,
        summary.files_written,
    ]
}

#[test]
fn collision_and_avatar_copy_are_resolved_then_rerun_is_a_no_op() {
    let fixture = Fixture::new();
    seed(&fixture);
    let sources = fixture.write_csv("users.csv", USERS_CSV);

    let first = fixture.run(&sources, PipelineOptions::default());
    assert_eq!(first.collisions, 1);
    assert_eq!(first.inserts, 5);
    assert_eq!(first.files_written, 5);
    assert_eq!(first.missing, 1);

    let shared = sha1_bytes(b"shared avatar");
    assert_eq!(
        fixture.report("cross_user_collisions.csv"),
        vec![vec![
            shared.to_string(),
            "3;7".to_string(),
            "7".to_string(),
            "primary_match".to_string(),
        ]]
    );
    let face = sha1_bytes(b"user twelve face");
    assert_eq!(
        fixture.report("duplicate_images_removed.csv"),
        vec![vec![
            "12".to_string(),
            face.to_string(),
            "1".to_string(),
            "avatar_in_additional".to_string(),
        ]]
    );
    assert_eq!(
        fixture.report("missing_images.csv"),
        vec![vec![
            "30".to_string(),
            "profile_image".to_string(),
            "gone.jpg".to_string(),
        ]]
    );

    let store = ImageStore::open(fixture.db()).unwrap();
    let profiles = store.list_profiles().unwrap();
    let primary_of = |user: i64| {
        profiles
            .iter()
            .find(|profile| profile.user_id == UserId(user))
            .and_then(|profile| profile.primary.as_ref())
            .map(|asset| asset.digest.clone())
    };
    assert_eq!(primary_of(7), Some(shared.clone()));
    assert_eq!(primary_of(3), Some(sha1_bytes(b"user three")));
    let images = store.list_images().unwrap();
    assert!(
        !images
            .iter()
            .any(|image| image.record.profile_id == UserId(3) && image.record.asset.digest == shared)
    );
    let additional_12: Vec<(u32, String)> = images
        .iter()
        .filter(|image| {
            image.record.profile_id == UserId(12) && image.record.kind == ImageKind::Additional
        })
        .map(|image| (image.record.position, image.record.asset.dest_path.clone()))
        .collect();
    assert_eq!(additional_12.len(), 2);
    assert_eq!(additional_12[0].0, 1);
    assert!(additional_12[0].1.ends_with("_x1.png"));
    assert_eq!(additional_12[1].0, 2);
    assert!(additional_12[1].1.ends_with("_x2.png"));
    drop(store);

    let files_before = fixture.media_files();
    assert_eq!(files_before.len(), 5);
    assert!(files_before.iter().all(|file| file.starts_with("user_")));

    let second = fixture.run(&sources, PipelineOptions::default());
    assert_eq!(change_counters(&second), [0; 11]);
    assert!(fixture.report("cross_user_collisions.csv").is_empty());
    assert!(fixture.report("duplicate_images_removed.csv").is_empty());
    assert_eq!(fixture.media_files(), files_before);
    assert_eq!(ImageStore::open(fixture.db()).unwrap().list_images().unwrap(), images);
}

#[test]
fn dry_run_plans_the_same_changes_and_writes_nothing() {
    let dry = Fixture::new();
    seed(&dry);
    let sources = dry.write_csv("users.csv", USERS_CSV);
    let planned = dry.run(
        &sources,
        PipelineOptions {
            dry_run: true,
            ..PipelineOptions::default()
        },
    );
    assert!(planned.dry_run);
    assert!(!dry.db().exists());
    assert!(dry.media_files().is_empty());
    assert_eq!(dry.report("cross_user_collisions.csv").len(), 1);

    let real = Fixture::new();
    seed(&real);
    let sources = real.write_csv("users.csv", USERS_CSV);
    let applied = real.run(&sources, PipelineOptions::default());
    assert_eq!(
        RunSummary {
            dry_run: false,
            files_written: applied.files_written,
            ..planned
        },
        applied
    );
}

#[test]
fn prefixed_basename_resolves_only_when_unique() {
    let unique = Fixture::new();
    unique.write_upload("2021/05/portrait.jpg", b"portrait");
    let sources = unique.write_csv(
        "users.csv",
        "uid,profile_image\n20,https://old.example/wp-content/uploads/face_abc123_portrait.jpg\n",
    );
    let summary = unique.run(&sources, PipelineOptions::default());
    assert_eq!(summary.missing, 0);
    assert_eq!(summary.inserts, 1);
    assert_eq!(
        unique.report("resolved.csv")[0][3],
        "2021/05/portrait.jpg".to_string()
    );

    let ambiguous = Fixture::new();
    ambiguous.write_upload("2021/05/portrait.jpg", b"portrait one");
    ambiguous.write_upload("2022/01/portrait.jpg", b"portrait two");
    let sources = ambiguous.write_csv(
        "users.csv",
        "uid,profile_image\n20,https://old.example/wp-content/uploads/face_abc123_portrait.jpg\n",
    );
    let summary = ambiguous.run(&sources, PipelineOptions::default());
    assert_eq!(summary.missing, 1);
    assert_eq!(summary.inserts, 0);
    assert_eq!(
        ambiguous.report("missing_images.csv"),
        vec![vec![
            "20".to_string(),
            "profile_image".to_string(),
            "https://old.example/wp-content/uploads/face_abc123_portrait.jpg".to_string(),
        ]]
    );
}

#[test]
fn any_duplicate_mode_drops_cross_kind_copies() {
    let fixture = Fixture::new();
    fixture.write_upload("p.png", b"portrait");
    fixture.write_upload("dup.png", b"same bytes");
    fixture.write_upload("dup-copy.png", b"same bytes");
    let sources = fixture.write_csv(
        "users.csv",
        "id,profile_image,additional,private\n5,p.png,dup.png,dup-copy.png\n",
    );
    let summary = fixture.run(
        &sources,
        PipelineOptions {
            dedup_mode: DedupMode::AnyDuplicate,
            ..PipelineOptions::default()
        },
    );
    assert_eq!(summary.duplicates_removed, 1);
    let rows = fixture.report("per_user_summary.csv");
    assert_eq!(
        rows,
        vec![vec![
            "5".to_string(),
            "true".to_string(),
            "1".to_string(),
            "1".to_string(),
            "0".to_string(),
        ]]
    );
}

#[test]
fn additional_copy_of_another_users_avatar_does_not_outrank_them() {
    let fixture = Fixture::new();
    fixture.write_upload("a.jpg", b"shared avatar");
    let sources = fixture.write_csv(
        "users.csv",
        "user_id,profile_image,additional_images\n3,,uploads/a.jpg\n7,uploads/a.jpg,\n",
    );

    let first = fixture.run(&sources, PipelineOptions::default());
    assert_eq!(first.promoted_inputs, 0);
    let shared = sha1_bytes(b"shared avatar");
    assert_eq!(
        fixture.report("cross_user_collisions.csv"),
        vec![vec![
            shared.to_string(),
            "3;7".to_string(),
            "7".to_string(),
            "primary_match".to_string(),
        ]]
    );

    let store = ImageStore::open(fixture.db()).unwrap();
    let profiles = store.list_profiles().unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].user_id, UserId(7));
    assert_eq!(
        profiles[0].primary.as_ref().map(|asset| asset.digest.clone()),
        Some(shared)
    );
    let images = store.list_images().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].record.profile_id, UserId(7));
    assert_eq!(images[0].record.kind, ImageKind::Public);
    drop(store);

    let second = fixture.run(&sources, PipelineOptions::default());
    assert_eq!(change_counters(&second), [0; 11]);
}

#[test]
fn user_without_profile_image_gets_their_additional_promoted_once() {
    let fixture = Fixture::new();
    fixture.write_upload("extra.jpg", b"extra");
    fixture.write_upload("hidden.jpg", b"hidden");
    let sources = fixture.write_csv(
        "users.csv",
        "user_id,profile_image,additional_images,private_images\n5,missing.jpg,extra.jpg,hidden.jpg\n",
    );

    let first = fixture.run(&sources, PipelineOptions::default());
    assert_eq!(first.promoted_inputs, 1);
    assert_eq!(first.missing, 1);
    assert_eq!(
        fixture.report("per_user_summary.csv"),
        vec![vec![
            "5".to_string(),
            "true".to_string(),
            "1".to_string(),
            "0".to_string(),
            "1".to_string(),
        ]]
    );

    let second = fixture.run(&sources, PipelineOptions::default());
    assert_eq!(second.promoted_inputs, 0);
    assert_eq!(second.skipped_retired, 1);
    assert_eq!(change_counters(&second), [0; 11]);
}
