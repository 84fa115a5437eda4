//! Runtime configuration.
//!
//! Loaded from a TOML file; every field has a default so a partial (or
//! absent) file yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use ensemble_session::SessionTimeouts;

use crate::error::CoordResult;

/// Top-level runtime configuration for the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Where the SQLite database lives.
    pub database_path: PathBuf,
    pub session: SessionConfig,
    pub bus: BusConfig,
    pub log: LogConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/ensemble.db"),
            session: SessionConfig::default(),
            bus: BusConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Session timeout and sweep settings, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub general_timeout_secs: i64,
    pub conversational_timeout_secs: i64,
    pub workflow_timeout_secs: i64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            general_timeout_secs: 600,
            conversational_timeout_secs: 300,
            workflow_timeout_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// How many recent events the diagnostic ring keeps.
    pub history_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Session logs older than this (for ended sessions) are compacted.
    pub retention_days: i64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

impl CoreConfig {
    /// Load from a TOML file.  Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> CoordResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            general_secs: self.session.general_timeout_secs,
            conversational_secs: self.session.conversational_timeout_secs,
            workflow_secs: self.session.workflow_timeout_secs,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session.sweep_interval_secs)
    }

    /// How long ended sessions and their logs are kept before the
    /// maintenance sweep compacts them.
    pub fn log_retention(&self) -> Duration {
        Duration::from_secs(self.log.retention_days.max(0) as u64 * 86_400)
    }
}

// ── tests ────────────────────────────────────────────────────────────
