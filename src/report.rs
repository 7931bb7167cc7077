//! Audit reports for operator review.
//!
//! Every report is a UTF-8 CSV with a fixed header row, written even when
//! there are no rows. Files are staged in the report directory and renamed
//! into place so a reader never sees a half-written report.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

use crate::dedup::DuplicateRemoval;
use crate::gallery::Gallery;
use crate::model::{CollisionRecord, ImageKind, ImageReference};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to create report directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Failed to write report {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("Failed to encode report {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("Failed to encode summary {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// A row type with a fixed report file and header.
pub trait ReportRow {
    const FILE_NAME: &'static str;
    const HEADERS: &'static [&'static str];

    fn fields(&self) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRow {
    pub user_id: i64,
    pub field: String,
    pub value: String,
}

impl MissingRow {
    pub fn for_reference(reference: &ImageReference) -> Self {
        Self {
            user_id: reference.user_id.get(),
            field: reference.kind.field_name().to_string(),
            value: reference.raw_token.clone(),
        }
    }
}

impl ReportRow for MissingRow {
    const FILE_NAME: &'static str = "missing_images.csv";
    const HEADERS: &'static [&'static str] = &["user_id", "field", "value"];

    fn fields(&self) -> Vec<String> {
        vec![self.user_id.to_string(), self.field.clone(), self.value.clone()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRemovedRow {
    pub user_id: i64,
    pub digest: String,
    pub removed_count: usize,
    pub reason: String,
}

impl From<&DuplicateRemoval> for DuplicateRemovedRow {
    fn from(removal: &DuplicateRemoval) -> Self {
        Self {
            user_id: removal.user_id.get(),
            digest: removal.digest.to_string(),
            removed_count: removal.removed_count,
            reason: removal.reason.to_string(),
        }
    }
}

impl ReportRow for DuplicateRemovedRow {
    const FILE_NAME: &'static str = "duplicate_images_removed.csv";
    const HEADERS: &'static [&'static str] = &["user_id", "digest", "removed_count", "reason"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.user_id.to_string(),
            self.digest.clone(),
            self.removed_count.to_string(),
            self.reason.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionRow {
    pub digest: String,
    /// Claimant ids in ascending order, `;`-separated.
    pub user_ids: String,
    pub owner_choice: i64,
    pub reason: String,
}

impl From<&CollisionRecord> for CollisionRow {
    fn from(record: &CollisionRecord) -> Self {
        let user_ids = record
            .claimant_user_ids
            .iter()
            .map(|user| user.to_string())
            .collect::<Vec<_>>()
            .join(";");
        Self {
            digest: record.digest.to_string(),
            user_ids,
            owner_choice: record.resolved_owner.get(),
            reason: record.reason.as_str().to_string(),
        }
    }
}

impl ReportRow for CollisionRow {
    const FILE_NAME: &'static str = "cross_user_collisions.csv";
    const HEADERS: &'static [&'static str] = &["digest", "user_ids", "owner_choice", "reason"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.digest.clone(),
            self.user_ids.clone(),
            self.owner_choice.to_string(),
            self.reason.clone(),
        ]
    }
}

/// A reference resolved by the tie-break among several candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousChoiceRow {
    pub user_id: i64,
    pub field: String,
    pub value: String,
    pub chosen: String,
    /// Every candidate path, `;`-separated.
    pub alternatives: String,
}

impl ReportRow for AmbiguousChoiceRow {
    const FILE_NAME: &'static str = "ambiguous_choices.csv";
    const HEADERS: &'static [&'static str] = &["user_id", "field", "value", "chosen", "alternatives"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.user_id.to_string(),
            self.field.clone(),
            self.value.clone(),
            self.chosen.clone(),
            self.alternatives.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummaryRow {
    pub user_id: i64,
    pub has_avatar: bool,
    pub public_count: usize,
    pub additional_count: usize,
    pub private_count: usize,
}

impl ReportRow for UserSummaryRow {
    const FILE_NAME: &'static str = "per_user_summary.csv";
    const HEADERS: &'static [&'static str] = &[
        "user_id",
        "has_avatar",
        "public_count",
        "additional_count",
        "private_count",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.user_id.to_string(),
            self.has_avatar.to_string(),
            self.public_count.to_string(),
            self.additional_count.to_string(),
            self.private_count.to_string(),
        ]
    }
}

/// Per-user counts of the planned gallery.
pub fn user_summaries(gallery: &Gallery) -> Vec<UserSummaryRow> {
    gallery
        .profiles()
        .map(|profile| UserSummaryRow {
            user_id: profile.user_id.get(),
            has_avatar: profile.primary.is_some(),
            public_count: profile.count(ImageKind::Public),
            additional_count: profile.count(ImageKind::Additional),
            private_count: profile.count(ImageKind::Private),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRow {
    pub user_id: i64,
    pub kind: String,
    pub value: String,
    pub provenance: String,
}

impl From<&ImageReference> for ReferenceRow {
    fn from(reference: &ImageReference) -> Self {
        Self {
            user_id: reference.user_id.get(),
            kind: reference.kind.as_str().to_string(),
            value: reference.raw_token.clone(),
            provenance: reference.provenance.to_string(),
        }
    }
}

impl ReportRow for ReferenceRow {
    const FILE_NAME: &'static str = "references.csv";
    const HEADERS: &'static [&'static str] = &["user_id", "kind", "value", "provenance"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.user_id.to_string(),
            self.kind.clone(),
            self.value.clone(),
            self.provenance.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRow {
    pub user_id: i64,
    pub kind: String,
    pub value: String,
    /// Path relative to the uploads root, `/`-separated.
    pub resolved_path: String,
}

impl ReportRow for ResolvedRow {
    const FILE_NAME: &'static str = "resolved.csv";
    const HEADERS: &'static [&'static str] = &["user_id", "kind", "value", "resolved_path"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.user_id.to_string(),
            self.kind.clone(),
            self.value.clone(),
            self.resolved_path.clone(),
        ]
    }
}

/// Write `rows` to `<out_dir>/<R::FILE_NAME>`, replacing any previous report.
pub fn write_report<R: ReportRow>(out_dir: &Path, rows: &[R]) -> Result<PathBuf, ReportError> {
    let path = out_dir.join(R::FILE_NAME);
    let tmp = staging_file(out_dir)?;
    let mut writer = csv::Writer::from_writer(tmp);
    let csv_error = |source: csv::Error| ReportError::Csv {
        path: path.clone(),
        source,
    };
    writer.write_record(R::HEADERS).map_err(csv_error)?;
    for row in rows {
        writer.write_record(row.fields()).map_err(csv_error)?;
    }
    let tmp = writer.into_inner().map_err(|err| ReportError::Write {
        path: path.clone(),
        source: err.into_error(),
    })?;
    persist(tmp, &path)?;
    info!(report = R::FILE_NAME, rows = rows.len(), "Wrote report");
    Ok(path)
}

/// File name of the run counters written by [`write_summary`].
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Write the run counters as pretty-printed JSON.
pub fn write_summary<T: Serialize>(out_dir: &Path, summary: &T) -> Result<PathBuf, ReportError> {
    let path = out_dir.join(SUMMARY_FILE_NAME);
    let mut tmp = staging_file(out_dir)?;
    serde_json::to_writer_pretty(&mut tmp, summary).map_err(|source| ReportError::Json {
        path: path.clone(),
        source,
    })?;
    persist(tmp, &path)?;
    Ok(path)
}

fn staging_file(out_dir: &Path) -> Result<NamedTempFile, ReportError> {
    fs::create_dir_all(out_dir).map_err(|source| ReportError::CreateDir {
        path: out_dir.to_path_buf(),
        source,
    })?;
    NamedTempFile::new_in(out_dir).map_err(|source| ReportError::Write {
        path: out_dir.to_path_buf(),
        source,
    })
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), ReportError> {
    tmp.persist(path).map_err(|err| ReportError::Write {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::sha1_bytes;
    use crate::model::{SourceTag, Tiebreak, UserId};
    use std::collections::BTreeSet;

    #[test]
    fn empty_report_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report::<MissingRow>(dir.path(), &[]).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "user_id,field,value\n");
    }

    #[test]
    fn collision_row_joins_claimants_in_order() {
        let digest = sha1_bytes(b"a.jpg");
        let record = CollisionRecord {
            digest: digest.clone(),
            claimant_user_ids: BTreeSet::from([UserId(7), UserId(3)]),
            resolved_owner: UserId(7),
            reason: Tiebreak::PrimaryMatch,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(dir.path(), &[CollisionRow::from(&record)]).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(
            text,
            format!("digest,user_ids,owner_choice,reason\n{digest},3;7,7,primary_match\n")
        );
    }

    #[test]
    fn values_with_separators_are_quoted_and_report_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let reference = ImageReference {
            user_id: UserId(4),
            kind: ImageKind::Additional,
            raw_token: "a.jpg, b.jpg".to_string(),
            provenance: SourceTag::Tabular {
                source: "users.csv".to_string(),
                column: "additional".to_string(),
            },
        };
        write_report(dir.path(), &[MissingRow::for_reference(&reference)]).unwrap();
        let path = write_report(dir.path(), &[MissingRow::for_reference(&reference)]).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("4,additional_images,\"a.jpg, b.jpg\""));
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn summary_is_json() {
        #[derive(Serialize)]
        struct Counters {
            inserted: usize,
        }
        let dir = tempfile::tempdir().unwrap();
        let path = write_summary(dir.path(), &Counters { inserted: 3 }).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["inserted"], 3);
    }
}
