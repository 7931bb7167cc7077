//! Typed rows shared by every pipeline stage.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Numeric identifier of a site user. Profiles are keyed by their owning user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Return the raw numeric id.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gallery classification of a profile image.
///
/// Variant order doubles as the dedup priority: `Public > Additional > Private`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Public,
    Additional,
    Private,
}

impl ImageKind {
    /// All kinds in priority order.
    pub const ALL: [ImageKind; 3] = [ImageKind::Public, ImageKind::Additional, ImageKind::Private];

    /// Stable lowercase name used in the store and in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Public => "public",
            ImageKind::Additional => "additional",
            ImageKind::Private => "private",
        }
    }

    /// Parse a stored kind name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "public" => Some(ImageKind::Public),
            "additional" => Some(ImageKind::Additional),
            "private" => Some(ImageKind::Private),
            _ => None,
        }
    }

    /// Canonical input column for this kind.
    pub fn field_name(self) -> &'static str {
        match self {
            ImageKind::Public => "profile_image",
            ImageKind::Additional => "additional_images",
            ImageKind::Private => "private_images",
        }
    }

    /// First slot of a contiguous run: `0` for the primary, `1` otherwise.
    pub fn first_position(self) -> u32 {
        match self {
            ImageKind::Public => 0,
            ImageKind::Additional | ImageKind::Private => 1,
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an image reference came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTag {
    /// A cell of a spreadsheet-style export.
    Tabular { source: String, column: String },
    /// An attachment row of the migrated CMS, keyed by its post id.
    Attachment { post_id: i64 },
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTag::Tabular { source, column } => write!(f, "{source}#{column}"),
            SourceTag::Attachment { post_id } => write!(f, "attachment:{post_id}"),
        }
    }
}

/// One raw image mention for one user, as found in an input source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub user_id: UserId,
    pub kind: ImageKind,
    pub raw_token: String,
    pub provenance: SourceTag,
}

impl ImageReference {
    /// True when the raw token is an absolute http(s) URL.
    pub fn is_url(&self) -> bool {
        let lower = self.raw_token.trim_start().to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }
}

/// Lowercase hex SHA-1 of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha1Hex(String);

impl Sha1Hex {
    /// Length of a hex-encoded SHA-1.
    pub const LEN: usize = 40;
    /// Number of hex characters used to salt mirrored file names.
    pub const SHORT_LEN: usize = 12;

    /// Validate and normalize a 40-character hex string.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.len() != Self::LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(trimmed.to_ascii_lowercase()))
    }

    /// Wrap hasher output that is already 40 lowercase hex characters.
    pub(crate) fn from_hex_unchecked(value: String) -> Self {
        debug_assert_eq!(value.len(), Self::LEN);
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters used in mirrored file names.
    pub fn short(&self) -> &str {
        &self.0[..Self::SHORT_LEN]
    }
}

impl fmt::Display for Sha1Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file under the uploads tree together with its content identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub abs_path: PathBuf,
    pub digest: Sha1Hex,
    pub size_bytes: u64,
}

/// A file inside the managed media store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MirroredAsset {
    /// Path relative to the media root, `/`-separated, no leading root prefix.
    pub dest_path: String,
    pub digest: Sha1Hex,
    pub owner_user: UserId,
}

/// One gallery row of a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileImageRecord {
    pub profile_id: UserId,
    pub kind: ImageKind,
    pub position: u32,
    pub asset: MirroredAsset,
    pub source_url: Option<String>,
}

/// Rule that picked the canonical owner of a contested digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tiebreak {
    /// Exactly one claimant uses the content as their primary image.
    PrimaryMatch,
    /// No unique primary claimant; the lowest user id wins.
    LowestUserId,
}

impl Tiebreak {
    pub fn as_str(self) -> &'static str {
        match self {
            Tiebreak::PrimaryMatch => "primary_match",
            Tiebreak::LowestUserId => "lowest_user_id",
        }
    }
}

/// Outcome of resolving one digest claimed by several users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionRecord {
    pub digest: Sha1Hex,
    pub claimant_user_ids: BTreeSet<UserId>,
    pub resolved_owner: UserId,
    pub reason: Tiebreak,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_order_matches_dedup_priority() {
        let mut kinds = vec![ImageKind::Private, ImageKind::Public, ImageKind::Additional];
        kinds.sort();
        assert_eq!(kinds, ImageKind::ALL.to_vec());
        assert_eq!(ImageKind::parse(" Additional "), Some(ImageKind::Additional));
        assert_eq!(ImageKind::parse("hero"), None);
    }

    #[test]
    fn sha1_hex_rejects_bad_input_and_lowercases() {
        assert!(Sha1Hex::parse("abc").is_none());
        assert!(Sha1Hex::parse(&"z".repeat(40)).is_none());
        let digest = Sha1Hex::parse("A9993E364706816ABA3E25717850C26C9CD0D89D").unwrap();
        assert_eq!(digest.as_str(), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(digest.short(), "a9993e364706");
    }

    #[test]
    fn url_detection_is_case_insensitive() {
        let reference = ImageReference {
            user_id: UserId(1),
            kind: ImageKind::Public,
            raw_token: "HTTPS://example.com/a.jpg".to_string(),
            provenance: SourceTag::Attachment { post_id: 4 },
        };
        assert!(reference.is_url());
        let relative = ImageReference {
            raw_token: " /wp-content/uploads/https-a.jpg".to_string(),
            ..reference
        };
        assert!(!relative.is_url());
    }
}
