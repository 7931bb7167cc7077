use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::digest::DigestCache;
use crate::mirror::{FetchedImage, RemoteSource};
use crate::model::{ImageReference, ResolvedFile};
use crate::report::{AmbiguousChoiceRow, MissingRow, ResolvedRow};
use crate::resolve::{PathResolver, ResolveStep};

/// Where the bytes of a located reference come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Uploads { file: ResolvedFile, relative: PathBuf },
    Remote { image: FetchedImage },
}

/// A reference whose content is available for mirroring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedReference {
    pub reference: ImageReference,
    pub origin: Origin,
}

impl LocatedReference {
    pub fn resolved_row(&self) -> ResolvedRow {
        let resolved_path = match &self.origin {
            Origin::Uploads { relative, .. } => slash_path(relative),
            Origin::Remote { .. } => self.reference.raw_token.clone(),
        };
        ResolvedRow {
            user_id: self.reference.user_id.get(),
            kind: self.reference.kind.as_str().to_string(),
            value: self.reference.raw_token.clone(),
            resolved_path,
        }
    }
}

/// Located references plus everything that could not be located.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub located: Vec<LocatedReference>,
    pub missing: Vec<MissingRow>,
    pub ambiguous: Vec<AmbiguousChoiceRow>,
    pub fetched: usize,
}

/// Locate every reference under the uploads root, falling back to `remote`
/// for unresolved URL tokens. Nothing here is fatal: failures become missing
/// rows.
pub fn resolve_stage(
    references: &[ImageReference],
    resolver: &PathResolver,
    cache: &mut DigestCache,
    remote: Option<&dyn RemoteSource>,
) -> Resolution {
    let mut resolution = Resolution::default();
    let mut fetched: HashMap<String, Option<FetchedImage>> = HashMap::new();
    for reference in references {
        let unresolved = match resolver.resolve(&reference.raw_token) {
            Ok(path) => match cache.resolve(&path.abs_path) {
                Ok(file) => {
                    if path.step == ResolveStep::Tiebreak {
                        resolution.ambiguous.push(AmbiguousChoiceRow {
                            user_id: reference.user_id.get(),
                            field: reference.kind.field_name().to_string(),
                            value: reference.raw_token.clone(),
                            chosen: slash_path(&path.relative),
                            alternatives: path
                                .alternatives
                                .iter()
                                .map(|alt| slash_path(alt))
                                .collect::<Vec<_>>()
                                .join(";"),
                        });
                    }
                    resolution.located.push(LocatedReference {
                        reference: reference.clone(),
                        origin: Origin::Uploads {
                            file,
                            relative: path.relative,
                        },
                    });
                    continue;
                }
                Err(err) => {
                    warn!(path = %path.abs_path.display(), error = %err, "File vanished before hashing");
                    err.to_string()
                }
            },
            Err(err) => err.to_string(),
        };

        let remote_image = match remote {
            Some(remote) if reference.is_url() => fetched
                .entry(reference.raw_token.clone())
                .or_insert_with(|| match remote.fetch(reference.raw_token.trim()) {
                    Ok(image) => Some(image),
                    Err(err) => {
                        warn!(user_id = %reference.user_id, error = %err, "Remote fetch failed");
                        None
                    }
                })
                .clone(),
            _ => None,
        };
        match remote_image {
            Some(image) => {
                resolution.fetched += 1;
                resolution.located.push(LocatedReference {
                    reference: reference.clone(),
                    origin: Origin::Remote { image },
                });
            }
            None => {
                debug!(
                    user_id = %reference.user_id,
                    token = %reference.raw_token,
                    reason = %unresolved,
                    "Reference is missing"
                );
                resolution.missing.push(MissingRow::for_reference(reference));
            }
        }
    }
    info!(
        located = resolution.located.len(),
        missing = resolution.missing.len(),
        ambiguous = resolution.ambiguous.len(),
        fetched = resolution.fetched,
        "Resolved references"
    );
    resolution
}

fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
