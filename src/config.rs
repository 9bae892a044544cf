//! Session configuration
//!
//! Passed explicitly to every recording session; there is no process-wide
//! default. Serializable so hosts can ship it alongside task definitions.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default bound on a single recorder's start (ms)
pub const DEFAULT_START_TIMEOUT_MS: u64 = 5_000;

/// Default bound on a single recorder's stop (ms)
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

fn default_start_timeout_ms() -> u64 {
    DEFAULT_START_TIMEOUT_MS
}

fn default_stop_timeout_ms() -> u64 {
    DEFAULT_STOP_TIMEOUT_MS
}

/// Settings shared by all recorders of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session-wide output directory, between call-site overrides and
    /// configuration defaults in precedence
    #[serde(default)]
    pub output_directory: Option<PathBuf>,
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,
    /// A recorder whose stop takes longer is recorded as timed out
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_directory: None,
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(directory.into());
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn output_directory(&self) -> Option<&Path> {
        self.output_directory.as_deref()
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Reject settings that would make every recorder time out
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "start_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.stop_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stop_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
