//! Configuration loading for the phrasing tools.
//!
//! Every tunable constant of segmentation and humanization lives in one
//! TOML document. Sections that are left out keep their defaults.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/phrasing/config.toml` (system)
//! 2. `~/.config/phrasing/config.toml` (user)
//! 3. `--config <path>` if given, otherwise `./phrasing.toml` (local)
//! 4. Environment variables (`PHRASING_LOG_LEVEL`, `RUST_LOG`, `PHRASING_SEED`)
//!
//! Files are merged key by key, so a local file can change a single
//! threshold without repeating the rest of its section.
//!
//! # Example Config
//!
//! ```toml
//! seed = 42
//!
//! [durations]
//! standard = 0.25
//! trill_max = 0.05
//!
//! [segmentation]
//! silence = 0.3
//! velocity_window = 5
//!
//! [humanize]
//! breath_silence = 0.15
//! staccato_multiplier = 0.75
//!
//! [logging]
//! level = "info"
//! ```

pub mod loader;

pub use loader::{discover_config_files, discover_config_files_with_override, ConfigSources};

use midi_phrasing::{DurationProfile, HumanizeParams, SegmentationParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to render configuration: {0}")]
    Render(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or `midi_phrasing=debug`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete phrasing configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhrasingConfig {
    /// Seed for the velocity jitter; a fresh one is drawn when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub durations: DurationProfile,
    pub segmentation: SegmentationParams,
    pub humanize: HumanizeParams,
    pub logging: LoggingConfig,
}

impl PhrasingConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load with an explicit file in place of `./phrasing.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where values came from.
    ///
    /// An explicitly requested file that does not exist is an error; the
    /// standard locations are simply skipped when absent.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::FileRead {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                });
            }
        }

        let files = loader::discover_config_files_with_override(config_path);
        let (mut config, mut sources) = loader::load_files(&files)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Check every section against its own constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: midi_phrasing::Error| ConfigError::Invalid(e.to_string());
        self.durations.validate().map_err(invalid)?;
        self.segmentation.validate().map_err(invalid)?;
        self.humanize.validate().map_err(invalid)?;
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level must not be empty".to_string()));
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(self).map_err(|e| ConfigError::Render(e.to_string()))?;
        Ok(format!("# Phrasing Configuration\n\n{}", body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_is_valid() {
        let config = PhrasingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.segmentation.silence, 0.3);
        assert_eq!(config.humanize.breath_silence, 0.15);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.seed, None);
    }

    #[test]
    fn toml_output_round_trips() {
        let config = PhrasingConfig {
            seed: Some(9),
            ..PhrasingConfig::default()
        };
        let rendered = config.to_toml().unwrap();
        assert!(rendered.starts_with("# Phrasing Configuration"));
        assert!(rendered.contains("[segmentation]"));
        assert!(rendered.contains("[humanize]"));

        let parsed: PhrasingConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn invalid_section_is_reported() {
        let mut config = PhrasingConfig::default();
        config.durations.standard_tolerance = 0.2;
        match config.validate() {
            Err(ConfigError::Invalid(message)) => assert!(message.contains("standard_tolerance")),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = PhrasingConfig::load_from(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }
}
