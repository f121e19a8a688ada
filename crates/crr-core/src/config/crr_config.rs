//! Engine configuration.
//!
//! # Examples
//!
//! ```
//! use crr_core::config::CrrConfig;
//!
//! let config = CrrConfig::from_toml("backfill_batch_size = 50").unwrap();
//! assert_eq!(config.backfill_batch_size, 50);
//! assert!(config.wal_mode);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::defaults;
use crate::errors::ConfigError;

/// Tunables for a CRR-enabled connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrrConfig {
    /// Rows per batch when backfilling in `no_tx` mode. Default: 1000.
    pub backfill_batch_size: usize,
    /// Busy timeout applied to the write connection, in milliseconds. Default: 5000.
    pub busy_timeout_ms: u32,
    /// Use WAL journaling for file-backed databases. Default: true.
    pub wal_mode: bool,
    /// Leave a peer's own authored records out of changesets built for it. Default: true.
    pub exclude_peer_own_changes: bool,
}

impl Default for CrrConfig {
    fn default() -> Self {
        Self {
            backfill_batch_size: defaults::DEFAULT_BACKFILL_BATCH_SIZE,
            busy_timeout_ms: defaults::DEFAULT_BUSY_TIMEOUT_MS,
            wal_mode: defaults::DEFAULT_WAL_MODE,
            exclude_peer_own_changes: defaults::DEFAULT_EXCLUDE_PEER_OWN_CHANGES,
        }
    }
}

impl CrrConfig {
    /// Parse configuration from a TOML string. Missing keys take defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: CrrConfig = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            path: "<string>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply `CRR_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let mut config: CrrConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `CRR_BACKFILL_BATCH_SIZE` and `CRR_BUSY_TIMEOUT_MS` when set and parseable.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("CRR_BACKFILL_BATCH_SIZE") {
            self.backfill_batch_size = v;
        }
        if let Some(v) = env_parse::<u32>("CRR_BUSY_TIMEOUT_MS") {
            self.busy_timeout_ms = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backfill_batch_size == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "backfill_batch_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
