//! Path resolver: maps a raw image token onto a file under the read-only
//! legacy uploads tree.
//!
//! Resolution order, first hit wins:
//! 1. the remainder after an uploads marker segment (or the token's own path)
//!    as a path relative to the root;
//! 2. files anywhere in the tree with the token's basename, then with a
//!    plugin prefix stripped from the basename;
//! 3. several basename hits are narrowed by the token's `/YYYY/MM/` folders
//!    and a deterministic tie-break. Without a folder hint they stay
//!    unresolved.

use std::{
    cmp::Reverse,
    fs,
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use thiserror::Error;
use tracing::debug;

use crate::config::ResolverSettings;

mod index;
mod token;

pub use index::UploadIndex;
pub use token::{ParsedToken, YearMonth, parse_token, strip_known_prefix};

/// Fatal problems with the uploads root itself.
#[derive(Debug, Error)]
pub enum UploadRootError {
    #[error("Uploads root is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("Failed to read uploads root {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Why a token did not resolve. Recorded as missing, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnresolvedReference {
    #[error("No file matches {token:?}")]
    NotFound { token: String },
    #[error("{token:?} matches {} files", .candidates.len())]
    Ambiguous {
        token: String,
        candidates: Vec<PathBuf>,
    },
    #[error("{token:?} points outside the uploads root")]
    OutsideRoot { token: String },
}

/// Which rule produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStep {
    /// Exact relative path under the root.
    Exact,
    /// The only file in the tree with a matching basename.
    Basename,
    /// Picked among several basename matches.
    Tiebreak,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub abs_path: PathBuf,
    /// Path relative to the uploads root.
    pub relative: PathBuf,
    pub step: ResolveStep,
    /// Every candidate considered when `step` is [`ResolveStep::Tiebreak`].
    pub alternatives: Vec<PathBuf>,
}

/// Resolver bound to one uploads root, indexed once per run.
#[derive(Debug)]
pub struct PathResolver {
    root: PathBuf,
    canonical_root: PathBuf,
    index: UploadIndex,
    settings: ResolverSettings,
}

impl PathResolver {
    pub fn open(root: &Path, settings: &ResolverSettings) -> Result<Self, UploadRootError> {
        if !root.is_dir() {
            return Err(UploadRootError::NotADirectory(root.to_path_buf()));
        }
        let canonical_root = root.canonicalize().map_err(|source| UploadRootError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let index = UploadIndex::build(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            canonical_root,
            index,
            settings: settings.clone(),
        })
    }

    pub fn resolve(&self, raw_token: &str) -> Result<ResolvedPath, UnresolvedReference> {
        let parsed = parse_token(raw_token, &self.settings.marker_segments);
        let Some(relative) = sanitize_relative(&parsed.relative_hint) else {
            return Err(UnresolvedReference::OutsideRoot {
                token: raw_token.to_string(),
            });
        };
        if !relative.as_os_str().is_empty() {
            let candidate = self.root.join(&relative);
            if candidate.is_file() {
                if !self.stays_inside_root(&candidate) {
                    return Err(UnresolvedReference::OutsideRoot {
                        token: raw_token.to_string(),
                    });
                }
                return Ok(ResolvedPath {
                    abs_path: candidate,
                    relative,
                    step: ResolveStep::Exact,
                    alternatives: Vec::new(),
                });
            }
        }
        debug!(
            token = raw_token,
            had_marker = parsed.had_marker,
            "No exact path match, trying basename lookup"
        );
        self.resolve_by_basename(raw_token, &parsed)
    }

    fn resolve_by_basename(
        &self,
        raw_token: &str,
        parsed: &ParsedToken,
    ) -> Result<ResolvedPath, UnresolvedReference> {
        let mut names = vec![parsed.basename.clone()];
        if let Some(stripped) = strip_known_prefix(&parsed.basename, &self.settings.stripped_prefixes)
        {
            names.push(stripped);
        }
        for name in names {
            if !self.has_image_extension(&name) {
                continue;
            }
            let candidates = self.index.candidates(&name);
            match candidates {
                [] => continue,
                [only] => return Ok(self.accept(only, ResolveStep::Basename, Vec::new())),
                many => return self.choose_among(raw_token, many, parsed.year_month.as_ref()),
            }
        }
        Err(UnresolvedReference::NotFound {
            token: raw_token.to_string(),
        })
    }

    fn choose_among(
        &self,
        raw_token: &str,
        candidates: &[PathBuf],
        hint: Option<&YearMonth>,
    ) -> Result<ResolvedPath, UnresolvedReference> {
        let ambiguous = || UnresolvedReference::Ambiguous {
            token: raw_token.to_string(),
            candidates: candidates.to_vec(),
        };
        let Some(hint) = hint else {
            return Err(ambiguous());
        };
        let in_year: Vec<&PathBuf> = candidates
            .iter()
            .filter(|path| components(path).iter().any(|part| *part == hint.year))
            .collect();
        if in_year.is_empty() {
            return Err(ambiguous());
        }
        let in_month: Vec<&PathBuf> = in_year
            .iter()
            .copied()
            .filter(|path| {
                components(path)
                    .windows(2)
                    .any(|pair| pair[0] == hint.year && pair[1] == hint.month)
            })
            .collect();
        let mut narrowed = if in_month.is_empty() { in_year } else { in_month };
        narrowed.sort_by_cached_key(|path| {
            (
                path.as_os_str().len(),
                Reverse(self.modified(path)),
                (*path).clone(),
            )
        });
        let picked = narrowed[0];
        debug!(token = raw_token, picked = %picked.display(), "Picked among basename matches");
        Ok(self.accept(picked, ResolveStep::Tiebreak, candidates.to_vec()))
    }

    fn accept(&self, relative: &Path, step: ResolveStep, alternatives: Vec<PathBuf>) -> ResolvedPath {
        ResolvedPath {
            abs_path: self.root.join(relative),
            relative: relative.to_path_buf(),
            step,
            alternatives,
        }
    }

    fn has_image_extension(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.settings
                    .image_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }

    fn modified(&self, relative: &Path) -> Option<SystemTime> {
        fs::metadata(self.root.join(relative))
            .and_then(|meta| meta.modified())
            .ok()
    }

    fn stays_inside_root(&self, path: &Path) -> bool {
        path.canonicalize()
            .map(|canonical| canonical.starts_with(&self.canonical_root))
            .unwrap_or(false)
    }
}

/// Relative path with `.` and empty segments dropped; `None` if it climbs out.
fn sanitize_relative(hint: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(hint).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    Some(clean)
}

fn components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}
