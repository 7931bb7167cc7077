use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::app_dirs;

use super::PipelineConfig;

/// Errors that may occur while loading the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        /// TOML file path.
        path: PathBuf,
        /// TOML parse error.
        source: toml::de::Error,
    },
}

/// Load the config named on the command line, else the default config file in
/// the application directory, else built-in defaults.
pub fn load_or_default(explicit: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    if let Some(path) = explicit {
        return load_from_path(path);
    }
    let default_path = match app_dirs::default_config_path() {
        Ok(path) => path,
        Err(err) => {
            debug!(error = %err, "No application directory; using built-in config");
            return Ok(PipelineConfig::default());
        }
    };
    if default_path.is_file() {
        info!(path = %default_path.display(), "Loading config");
        load_from_path(&default_path)
    } else {
        Ok(PipelineConfig::default())
    }
}

/// Parse a TOML config file. Missing keys take their defaults.
pub fn load_from_path(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_config(text: &str) -> Result<PipelineConfig, toml::de::Error> {
    let mut config: PipelineConfig = toml::from_str(text)?;
    config.network = config.network.normalized();
    Ok(config)
}
