//! Configuration file loading.
//!
//! The file is TOML with `[provider]`, `[monitor]`, `[access]` and `[orders]`
//! sections. Every key is optional; no file at all means all defaults.
//! Credentials never live here.

use std::path::{Path, PathBuf};

use fleetops_control::{ControlConfig, MAX_BACKOFF_FACTOR, MAX_WAIT_LIMIT};
use fleetops_provider::HttpProviderConfig;
use serde::Deserialize;

/// Complete fleetops configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetopsConfig {
    /// Provider REST endpoint and timeouts.
    #[serde(default)]
    pub provider: HttpProviderConfig,

    /// Monitor, access and order settings.
    #[serde(flatten)]
    pub control: ControlConfig,
}

impl FleetopsConfig {
    /// Load configuration from `path`, or defaults when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let monitor = &self.control.monitor;
        if monitor.poll_interval_seconds == 0 {
            return Err(ConfigError::Validation(
                "monitor.poll_interval_seconds must be positive".into(),
            ));
        }
        if !(1.0..=MAX_BACKOFF_FACTOR).contains(&monitor.backoff_factor) {
            return Err(ConfigError::Validation(format!(
                "monitor.backoff_factor must be between 1.0 and {MAX_BACKOFF_FACTOR}"
            )));
        }
        if monitor.max_wait_seconds > MAX_WAIT_LIMIT.as_secs() {
            return Err(ConfigError::Validation(format!(
                "monitor.max_wait_seconds must be at most {}",
                MAX_WAIT_LIMIT.as_secs()
            )));
        }
        if self.control.access.worker_pool_size == 0 {
            return Err(ConfigError::Validation(
                "access.worker_pool_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
