//! Source normalizer.
//!
//! Turns spreadsheet exports and CMS attachment tables into one ordered stream
//! of [`ImageReference`] rows. Nothing here touches the filesystem beyond
//! reading the sources themselves.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{ImageKind, ImageReference, SourceTag, UserId};

mod aliases;
mod attachments;
mod promotion;
mod tabular;

pub use aliases::{CanonicalField, ColumnAliasTable, ImageColumn, ResolvedColumns};
pub use attachments::AttachmentIndex;
pub use promotion::PrimaryPromotionPolicy;
pub use tabular::TabularSource;

/// Errors raised while reading or interpreting an input source.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The source file could not be read at all.
    #[error("Failed to read source {path}: {source}")]
    SourceRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The source is not well-formed delimited text.
    #[error("Failed to parse source {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    /// No column of the source matches any user-id alias.
    #[error("Source {source_name} has no user id column")]
    MissingUserIdColumn { source_name: String },
    /// A user id cell is not an integer.
    #[error("Invalid user id {value:?}")]
    InvalidUserId { value: String },
}

/// Counters reported after normalization.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub rows_read: usize,
    pub invalid_user_ids: usize,
    pub references: usize,
    pub attachment_references: usize,
    pub demoted_public: usize,
}

/// Every reference found across all sources, in source order.
#[derive(Debug, Default, Clone)]
pub struct NormalizedReferences {
    pub references: Vec<ImageReference>,
    pub stats: NormalizeStats,
}

impl NormalizedReferences {
    /// References grouped by user, preserving the stream order within a user.
    pub fn by_user(&self) -> BTreeMap<UserId, Vec<&ImageReference>> {
        let mut grouped: BTreeMap<UserId, Vec<&ImageReference>> = BTreeMap::new();
        for reference in &self.references {
            grouped.entry(reference.user_id).or_default().push(reference);
        }
        grouped
    }
}

/// Normalize every tabular source, then append attachment references.
///
/// A source without a user-id column aborts the whole run; bad ids only skip
/// their row.
pub fn normalize(
    sources: &[TabularSource],
    attachments: Option<&AttachmentIndex>,
    table: &ColumnAliasTable,
) -> Result<NormalizedReferences, NormalizeError> {
    let mut stats = NormalizeStats::default();
    let mut references = Vec::new();
    for source in sources {
        normalize_source(source, table, &mut references, &mut stats)?;
    }
    if let Some(index) = attachments {
        let before = references.len();
        references.extend(index.references());
        stats.attachment_references = references.len() - before;
        stats.invalid_user_ids += index.invalid_rows();
    }
    stats.demoted_public = demote_extra_public(&mut references);
    stats.references = references.len();
    info!(
        rows = stats.rows_read,
        references = stats.references,
        invalid_user_ids = stats.invalid_user_ids,
        demoted_public = stats.demoted_public,
        "Normalized sources"
    );
    Ok(NormalizedReferences { references, stats })
}

/// Append the references of one tabular source.
pub fn normalize_source(
    source: &TabularSource,
    table: &ColumnAliasTable,
    out: &mut Vec<ImageReference>,
    stats: &mut NormalizeStats,
) -> Result<(), NormalizeError> {
    let columns = table.resolve(&source.headers);
    let Some(user_col) = columns.user_id() else {
        return Err(NormalizeError::MissingUserIdColumn {
            source_name: source.name.clone(),
        });
    };
    for row in &source.rows {
        stats.rows_read += 1;
        let user_id = match parse_user_id(tabular::cell(row, user_col)) {
            Ok(user_id) => user_id,
            Err(err) => {
                stats.invalid_user_ids += 1;
                debug!(source = %source.name, error = %err, "Skipping row");
                continue;
            }
        };
        for column in columns.image_columns() {
            for token in split_multi(tabular::cell(row, column.index)) {
                out.push(ImageReference {
                    user_id,
                    kind: column.kind,
                    raw_token: repair_scheme(&token),
                    provenance: SourceTag::Tabular {
                        source: source.name.clone(),
                        column: column.header.clone(),
                    },
                });
            }
        }
    }
    Ok(())
}

/// Parse a user id, accepting the `12.0` spelling spreadsheets produce.
pub fn parse_user_id(raw: &str) -> Result<UserId, NormalizeError> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(UserId(value));
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 => {
            Ok(UserId(value as i64))
        }
        _ => Err(NormalizeError::InvalidUserId {
            value: trimmed.to_string(),
        }),
    }
}

/// True for empty cells and the placeholders spreadsheet exports write for them.
pub fn is_absent(cell: &str) -> bool {
    let trimmed = cell.trim();
    trimmed.is_empty()
        || ["nan", "none", "null"]
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
}

/// Split a multi-value cell on `;` or `,`, dropping absent parts.
pub fn split_multi(cell: &str) -> Vec<String> {
    if is_absent(cell) {
        return Vec::new();
    }
    cell.split([';', ','])
        .map(str::trim)
        .filter(|part| !is_absent(part))
        .map(str::to_string)
        .collect()
}

/// Repair `https:/host` and `http:/host` to a proper scheme separator.
pub fn repair_scheme(token: &str) -> String {
    let trimmed = token.trim();
    for scheme in ["https:/", "http:/"] {
        let has_scheme = trimmed
            .get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme));
        if has_scheme && !trimmed[scheme.len()..].starts_with('/') {
            return format!("{scheme}/{}", &trimmed[scheme.len()..]);
        }
    }
    trimmed.to_string()
}

fn demote_extra_public(references: &mut [ImageReference]) -> usize {
    let mut seen = HashSet::new();
    let mut demoted = 0;
    for reference in references
        .iter_mut()
        .filter(|reference| reference.kind == ImageKind::Public)
    {
        if !seen.insert(reference.user_id) {
            reference.kind = ImageKind::Additional;
            demoted += 1;
        }
    }
    demoted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(headers: &[&str], rows: &[&[&str]]) -> TabularSource {
        TabularSource::from_rows(
            "members.csv",
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn user_ids_accept_float_spelling() {
        assert_eq!(parse_user_id(" 12.0 ").unwrap(), UserId(12));
        assert_eq!(parse_user_id("7").unwrap(), UserId(7));
        assert!(matches!(
            parse_user_id("12.5"),
            Err(NormalizeError::InvalidUserId { .. })
        ));
        assert!(parse_user_id("abc").is_err());
        assert!(parse_user_id("").is_err());
    }

    #[test]
    fn multi_value_cells_split_on_both_delimiters() {
        assert_eq!(split_multi("a.jpg; b.jpg,c.jpg"), vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(split_multi("a.jpg;;NaN; null"), vec!["a.jpg"]);
        assert!(split_multi("None").is_empty());
        assert!(split_multi("   ").is_empty());
    }

    #[test]
    fn scheme_repair_only_touches_broken_separators() {
        assert_eq!(repair_scheme("https:/x.org/a.jpg"), "https://x.org/a.jpg");
        assert_eq!(repair_scheme("http:/x.org/a.jpg"), "http://x.org/a.jpg");
        assert_eq!(repair_scheme("https://x.org/a.jpg"), "https://x.org/a.jpg");
        assert_eq!(repair_scheme("2020/01/a.jpg"), "2020/01/a.jpg");
    }

    #[test]
    fn rows_with_bad_ids_are_counted_not_fatal() {
        let input = source(
            &["UID", "Profile_Image", "additional"],
            &[
                &["3", "a.jpg", "b.jpg;c.jpg"],
                &["oops", "x.jpg", ""],
                &["4.0", "nan", "d.jpg"],
            ],
        );
        let result = normalize(&[input], None, &ColumnAliasTable::default()).unwrap();
        assert_eq!(result.stats.rows_read, 3);
        assert_eq!(result.stats.invalid_user_ids, 1);
        let summary: Vec<_> = result
            .references
            .iter()
            .map(|r| (r.user_id.get(), r.kind, r.raw_token.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (3, ImageKind::Public, "a.jpg"),
                (3, ImageKind::Additional, "b.jpg"),
                (3, ImageKind::Additional, "c.jpg"),
                (4, ImageKind::Additional, "d.jpg"),
            ]
        );
        assert!(matches!(
            &result.references[0].provenance,
            SourceTag::Tabular { column, .. } if column == "Profile_Image"
        ));
    }

    #[test]
    fn missing_user_id_column_is_fatal() {
        let input = source(&["name", "profile_image"], &[&["x", "a.jpg"]]);
        let err = normalize(&[input], None, &ColumnAliasTable::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingUserIdColumn { .. }));
    }

    #[test]
    fn extra_profile_images_are_demoted_across_sources() {
        let first = source(&["user_id", "profile_image"], &[&["5", "a.jpg;b.jpg"]]);
        let second = source(&["id", "profile_image"], &[&["5", "c.jpg"]]);
        let result = normalize(&[first, second], None, &ColumnAliasTable::default()).unwrap();
        let kinds: Vec<_> = result.references.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![ImageKind::Public, ImageKind::Additional, ImageKind::Additional]
        );
        assert_eq!(result.stats.demoted_public, 2);
        assert_eq!(result.by_user()[&UserId(5)].len(), 3);
    }
}
