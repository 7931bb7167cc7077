//! Pipeline configuration.
//!
//! Config keys (TOML): `columns`, `resolver`, `network`, `reports`. Every key
//! is optional; missing keys fall back to the defaults below, which match the
//! layout of the legacy exports.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod load;

pub use load::{ConfigError, load_from_path, load_or_default};

/// Aggregate configuration for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub columns: ColumnAliasConfig,
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub reports: ReportSettings,
}

/// Accepted spellings of each canonical input column, in priority order.
///
/// Config keys: `user_id`, `profile_image`, `additional_images`, `private_images`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAliasConfig {
    #[serde(default = "default_user_id_aliases")]
    pub user_id: Vec<String>,
    #[serde(default = "default_profile_image_aliases")]
    pub profile_image: Vec<String>,
    #[serde(default = "default_additional_aliases")]
    pub additional_images: Vec<String>,
    #[serde(default = "default_private_aliases")]
    pub private_images: Vec<String>,
}

impl Default for ColumnAliasConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id_aliases(),
            profile_image: default_profile_image_aliases(),
            additional_images: default_additional_aliases(),
            private_images: default_private_aliases(),
        }
    }
}

/// Path resolution knobs.
///
/// Config keys: `marker_segments`, `stripped_prefixes`, `image_extensions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Path segments that introduce a path relative to the uploads root.
    #[serde(default = "default_marker_segments")]
    pub marker_segments: Vec<String>,
    /// Plugin prefixes removed from basenames before the relaxed search.
    #[serde(default = "default_stripped_prefixes")]
    pub stripped_prefixes: Vec<String>,
    /// Extensions eligible for the basename fallback (lowercase, no dot).
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            marker_segments: default_marker_segments(),
            stripped_prefixes: default_stripped_prefixes(),
            image_extensions: default_image_extensions(),
        }
    }
}

/// Remote fetch policy for the web fallback.
///
/// Config keys: `web_fallback`, `max_attempts`, `base_delay_ms`, `max_delay_ms`,
/// `connect_timeout_secs`, `read_timeout_secs`, `max_bytes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default)]
    pub web_fallback: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl NetworkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.clamp(1, MAX_FETCH_ATTEMPTS);
        if self.max_delay_ms < self.base_delay_ms {
            self.max_delay_ms = self.base_delay_ms;
        }
        self
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            web_fallback: false,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            max_bytes: default_max_bytes(),
        }
    }
}

/// Where audit reports are written when the CLI does not say otherwise.
///
/// Config keys: `out_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSettings {
    #[serde(default = "default_report_dir")]
    pub out_dir: PathBuf,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            out_dir: default_report_dir(),
        }
    }
}

const MAX_FETCH_ATTEMPTS: usize = 10;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn default_user_id_aliases() -> Vec<String> {
    strings(&["user_id", "uid", "id"])
}

fn default_profile_image_aliases() -> Vec<String> {
    strings(&["profile_image"])
}

fn default_additional_aliases() -> Vec<String> {
    strings(&["additional_images", "additional"])
}

fn default_private_aliases() -> Vec<String> {
    strings(&["private_images", "private"])
}

fn default_marker_segments() -> Vec<String> {
    strings(&["wp-content/uploads/", "uploads/"])
}

fn default_stripped_prefixes() -> Vec<String> {
    strings(&["face_", "avatar_"])
}

fn default_image_extensions() -> Vec<String> {
    strings(&["jpg", "jpeg", "png", "gif", "webp", "bmp", "avif"])
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    20
}

fn default_max_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}
