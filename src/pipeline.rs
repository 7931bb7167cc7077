//! Orchestrator for the three commands.
//!
//! `run` plans every change on a [`Gallery`] snapshot, then (unless dry-run)
//! writes the media files of new rows and commits the store changes in one
//! transaction. Reports are written from the plan either way.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::dedup::{self, DedupMode};
use crate::digest::DigestCache;
use crate::gallery::{Gallery, GalleryChanges, StageOutcome};
use crate::mirror::{HttpRemoteSource, MediaStore, MirrorError, RemoteSource};
use crate::model::{ImageKind, UserId};
use crate::normalize::{
    AttachmentIndex, ColumnAliasTable, NormalizeError, NormalizeStats, NormalizedReferences,
    TabularSource,
};
use crate::report::{
    self, CollisionRow, DuplicateRemovedRow, MissingRow, ReferenceRow, ReportError, ResolvedRow,
};
use crate::resolve::{PathResolver, UploadRootError};
use crate::slots::{self, SlotPlan};
use crate::store::{ImageStore, ImageStoreError};

mod locate;

pub use locate::{LocatedReference, Origin, Resolution, resolve_stage};

/// Fatal errors. Per-reference problems never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No input sources given")]
    NoSources,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    UploadRoot(#[from] UploadRootError),
    #[error(transparent)]
    Store(#[from] ImageStoreError),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Tabular exports plus the optional CMS attachment tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePaths {
    pub csv: Vec<PathBuf>,
    pub wp_posts: Option<PathBuf>,
    pub wp_postmeta: Option<PathBuf>,
}

/// Locations a full run reads from and writes to.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub uploads: PathBuf,
    pub media: PathBuf,
    pub db: PathBuf,
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub dry_run: bool,
    pub dedup_mode: DedupMode,
    /// Fetch unresolved URL tokens over the network.
    pub web_fallback: bool,
}

/// Read and normalize every source.
pub fn normalize_stage(
    sources: &SourcePaths,
    config: &PipelineConfig,
) -> Result<NormalizedReferences, PipelineError> {
    if sources.csv.is_empty() && sources.wp_posts.is_none() {
        return Err(PipelineError::NoSources);
    }
    let tables = sources
        .csv
        .iter()
        .map(|path| TabularSource::read(path))
        .collect::<Result<Vec<_>, _>>()?;
    let attachments = match &sources.wp_posts {
        Some(posts) => {
            let posts = TabularSource::read(posts)?;
            let postmeta = sources
                .wp_postmeta
                .as_deref()
                .map(TabularSource::read)
                .transpose()?;
            Some(AttachmentIndex::build(&posts, postmeta.as_ref()))
        }
        None => None,
    };
    let aliases = ColumnAliasTable::from_config(&config.columns);
    Ok(crate::normalize::normalize(
        &tables,
        attachments.as_ref(),
        &aliases,
    )?)
}

/// `normalize` command: write `references.csv`.
pub fn run_normalize(
    sources: &SourcePaths,
    config: &PipelineConfig,
    out_dir: &Path,
) -> Result<NormalizeStats, PipelineError> {
    let normalized = normalize_stage(sources, config)?;
    let rows: Vec<ReferenceRow> = normalized.references.iter().map(ReferenceRow::from).collect();
    report::write_report(out_dir, &rows)?;
    Ok(normalized.stats)
}

/// Counters of the `resolve` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveSummary {
    pub normalize: NormalizeStats,
    pub resolved: usize,
    pub missing: usize,
    pub ambiguous_choices: usize,
}

/// `resolve` command: write `resolved.csv`, missing and ambiguous reports.
pub fn run_resolve(
    sources: &SourcePaths,
    uploads: &Path,
    config: &PipelineConfig,
    out_dir: &Path,
) -> Result<ResolveSummary, PipelineError> {
    let normalized = normalize_stage(sources, config)?;
    let resolver = PathResolver::open(uploads, &config.resolver)?;
    let resolution = resolve_stage(
        &normalized.references,
        &resolver,
        &mut DigestCache::new(),
        None,
    );
    let rows: Vec<ResolvedRow> = resolution
        .located
        .iter()
        .map(LocatedReference::resolved_row)
        .collect();
    report::write_report(out_dir, &rows)?;
    report::write_report(out_dir, &resolution.missing)?;
    report::write_report(out_dir, &resolution.ambiguous)?;
    Ok(ResolveSummary {
        normalize: normalized.stats,
        resolved: resolution.located.len(),
        missing: resolution.missing.len(),
        ambiguous_choices: resolution.ambiguous.len(),
    })
}

/// Counters of a full run, written to `summary.json`.
///
/// Everything from `staged` on counts changes; all of them are zero when a
/// run is repeated over unchanged inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub normalize: NormalizeStats,
    pub resolved: usize,
    pub missing: usize,
    pub ambiguous_choices: usize,
    pub fetched_remote: usize,
    pub promoted_inputs: usize,
    pub already_stored: usize,
    pub skipped_retired: usize,
    pub staged: usize,
    pub collisions: usize,
    pub duplicates_removed: usize,
    pub primary_fixes: usize,
    pub position_changes: usize,
    pub primary_syncs: usize,
    pub inserts: usize,
    pub deletes: usize,
    pub updates: usize,
    pub profile_updates: usize,
    pub retirements: usize,
    pub files_written: usize,
}

/// `run` command: the whole pipeline.
pub fn run(
    sources: &SourcePaths,
    paths: &RunPaths,
    config: &PipelineConfig,
    options: &PipelineOptions,
) -> Result<RunSummary, PipelineError> {
    let mut summary = RunSummary {
        dry_run: options.dry_run,
        ..RunSummary::default()
    };
    let normalized = normalize_stage(sources, config)?;
    let resolver = PathResolver::open(&paths.uploads, &config.resolver)?;
    let remote = (options.web_fallback || config.network.web_fallback)
        .then(|| HttpRemoteSource::new(&config.network));
    let mut resolution = resolve_stage(
        &normalized.references,
        &resolver,
        &mut DigestCache::new(),
        remote.as_ref().map(|source| source as &dyn RemoteSource),
    );

    let store = open_store(&paths.db, options.dry_run)?;
    let baseline = Gallery::from_store(&store)?;
    let mut gallery = baseline.clone();
    let media = MediaStore::new(&paths.media, options.dry_run);
    let origins = stage_located(&mut gallery, &media, &resolution.located, &mut summary);

    let outcome = dedup::resolve(&mut gallery, options.dedup_mode);
    let mut slot_plan = slots::assign_slots(&mut gallery);
    let changes = if options.dry_run {
        gallery.diff(&baseline)
    } else {
        let written = write_media(
            &media,
            &mut gallery,
            &baseline,
            &origins,
            &mut resolution,
            &mut slot_plan,
        )?;
        summary.files_written = written.files_written;
        if written.changes.is_empty() {
            info!("Store already up to date");
        } else {
            written.changes.apply(&store)?;
        }
        written.changes
    };
    for violation in slots::verify_invariants(&gallery) {
        warn!(
            user_id = %violation.user_id,
            kind = violation.kind.as_str(),
            detail = %violation.detail,
            "Slot invariant violated"
        );
    }

    summary.normalize = normalized.stats.clone();
    summary.resolved = resolution.located.len();
    summary.missing = resolution.missing.len();
    summary.ambiguous_choices = resolution.ambiguous.len();
    summary.fetched_remote = resolution.fetched;
    summary.promoted_inputs = outcome.input_promotions;
    summary.collisions = outcome.collisions.len();
    summary.duplicates_removed = outcome.removed_records();
    summary.primary_fixes = outcome.primary_fixes + slot_plan.primary_syncs;
    summary.position_changes = slot_plan.position_changes;
    summary.primary_syncs = slot_plan.primary_syncs;
    summary.inserts = changes.inserts.len();
    summary.deletes = changes.deletes.len();
    summary.updates = changes.updates.len();
    summary.profile_updates = changes.primary_updates.len();
    summary.retirements = changes.retirements.len();

    let out_dir = &paths.out_dir;
    let references: Vec<ReferenceRow> = normalized.references.iter().map(ReferenceRow::from).collect();
    report::write_report(out_dir, &references)?;
    let resolved: Vec<ResolvedRow> = resolution
        .located
        .iter()
        .map(LocatedReference::resolved_row)
        .collect();
    report::write_report(out_dir, &resolved)?;
    report::write_report(out_dir, &resolution.missing)?;
    report::write_report(out_dir, &resolution.ambiguous)?;
    let duplicates: Vec<DuplicateRemovedRow> =
        outcome.removals.iter().map(DuplicateRemovedRow::from).collect();
    report::write_report(out_dir, &duplicates)?;
    let collisions: Vec<CollisionRow> = outcome.collisions.iter().map(CollisionRow::from).collect();
    report::write_report(out_dir, &collisions)?;
    report::write_report(out_dir, &report::user_summaries(&gallery))?;
    report::write_summary(out_dir, &summary)?;

    info!(
        dry_run = options.dry_run,
        writes = changes.write_count(),
        inserts = summary.inserts,
        deletes = summary.deletes,
        updates = summary.updates,
        retirements = summary.retirements,
        files_written = summary.files_written,
        public = gallery
            .profiles()
            .map(|profile| profile.count(ImageKind::Public))
            .sum::<usize>(),
        "Run finished"
    );
    Ok(summary)
}

/// Stage every located reference into `gallery`. Returns the located indices
/// behind each newly planned destination.
fn stage_located(
    gallery: &mut Gallery,
    media: &MediaStore,
    located: &[LocatedReference],
    summary: &mut RunSummary,
) -> HashMap<String, Vec<usize>> {
    let mut origins: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, item) in located.iter().enumerate() {
        let owner = item.reference.user_id;
        let asset = match &item.origin {
            Origin::Uploads { file, .. } => media.plan(file, owner),
            Origin::Remote { image } => media.plan_fetched(&item.reference.raw_token, image, owner),
        };
        let source_url = item
            .reference
            .is_url()
            .then(|| item.reference.raw_token.trim().to_string());
        let dest_path = asset.dest_path.clone();
        match gallery.stage(item.reference.kind, asset, source_url) {
            StageOutcome::Added(_) => {
                summary.staged += 1;
                origins.entry(dest_path).or_default().push(index);
            }
            StageOutcome::AlreadyStored => summary.already_stored += 1,
            StageOutcome::Retired => summary.skipped_retired += 1,
        }
    }
    origins
}

/// Planned changes whose inserts all have their media file in place.
#[derive(Debug)]
struct MediaWrites {
    changes: GalleryChanges,
    files_written: usize,
}

/// Write the media file of every planned insert.
///
/// A source that can no longer be read takes its rows out of the plan and its
/// references over to the missing report; the gallery is then re-slotted and
/// diffed again. Only destination-side failures abort the run.
fn write_media(
    media: &MediaStore,
    gallery: &mut Gallery,
    baseline: &Gallery,
    origins: &HashMap<String, Vec<usize>>,
    resolution: &mut Resolution,
    slot_plan: &mut SlotPlan,
) -> Result<MediaWrites, MirrorError> {
    let mut files_written = 0;
    let mut handled: HashSet<String> = HashSet::new();
    let mut vanished: BTreeSet<usize> = BTreeSet::new();
    let changes = loop {
        let changes = gallery.diff(baseline);
        let mut unreadable: Vec<(UserId, String)> = Vec::new();
        for record in &changes.inserts {
            let dest_path = &record.asset.dest_path;
            if !handled.insert(dest_path.clone()) {
                continue;
            }
            let Some(indices) = origins.get(dest_path) else {
                continue;
            };
            let Some(item) = indices.first().map(|index| &resolution.located[*index]) else {
                continue;
            };
            let mirrored = match &item.origin {
                Origin::Uploads { file, .. } => media.mirror(file, record.profile_id),
                Origin::Remote { image } => {
                    media.mirror_fetched(&item.reference.raw_token, image, record.profile_id)
                }
            };
            match mirrored {
                Ok(outcome) => {
                    if outcome.written {
                        files_written += 1;
                    }
                }
                Err(MirrorError::ReadSource { path, source }) => {
                    warn!(path = %path.display(), error = %source, "Source vanished before copying");
                    vanished.extend(indices.iter().copied());
                    unreadable.push((record.profile_id, dest_path.clone()));
                }
                Err(err) => return Err(err),
            }
        }
        if unreadable.is_empty() {
            break changes;
        }
        for (user_id, dest_path) in &unreadable {
            gallery.discard_pending(*user_id, dest_path);
        }
        let again = slots::assign_slots(gallery);
        slot_plan.position_changes += again.position_changes;
        slot_plan.primary_syncs += again.primary_syncs;
    };

    if !vanished.is_empty() {
        for index in &vanished {
            resolution
                .missing
                .push(MissingRow::for_reference(&resolution.located[*index].reference));
        }
        let mut index = 0;
        resolution.located.retain(|_| {
            let keep = !vanished.contains(&index);
            index += 1;
            keep
        });
    }
    Ok(MediaWrites {
        changes,
        files_written,
    })
}

/// A dry-run never creates the database; a missing one plans against an
/// empty in-memory store.
fn open_store(db: &Path, dry_run: bool) -> Result<ImageStore, ImageStoreError> {
    if dry_run && !db.exists() {
        return ImageStore::open_in_memory();
    }
    ImageStore::open(db)
}
