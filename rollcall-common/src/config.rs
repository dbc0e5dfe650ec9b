//! Configuration loading for Rollcall services
//!
//! **[RCL-CFG-010]** Settings resolve with the priority order:
//! 1. Command-line argument (highest)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// TOML configuration file contents
///
/// All fields are optional; missing values fall back to compiled defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// SQLite database file path
    pub database_path: Option<String>,
    /// Sync queue poll interval in seconds
    pub queue_poll_interval_secs: Option<u64>,
    /// Maximum sync duration before the stale-lock sweep clears the lock (seconds)
    pub max_sync_duration_secs: Option<i64>,
    /// Stale-lock sweep interval in seconds
    pub lock_sweep_interval_secs: Option<u64>,
    /// Quota refresh interval in seconds
    pub quota_refresh_interval_secs: Option<u64>,
    /// Maximum number of events ingested concurrently within one sync
    pub ingest_parallelism: Option<usize>,
    /// Timeout for calls to external data sources (seconds)
    pub source_timeout_secs: Option<u64>,
    /// Status/health HTTP port
    pub status_port: Option<u16>,
    /// Base URL of the log sheet service (optional integration)
    pub log_sheet_base_url: Option<String>,
}

impl TomlConfig {
    /// Load TOML config from an explicit path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Cannot parse {}: {}", path.display(), e)))
    }

    /// Load TOML config from the default platform location, if present
    ///
    /// Looks for `rollcall/config.toml` under the user config directory, then
    /// `/etc/rollcall/config.toml` on unix. Absent files are not an error.
    pub fn load_default() -> Self {
        for candidate in default_config_paths() {
            if candidate.exists() {
                match Self::load(&candidate) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {}", candidate.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Ignoring unreadable config {}: {}", candidate.display(), e);
                    }
                }
            }
        }
        Self::default()
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("rollcall").join("config.toml"));
    }
    if cfg!(unix) {
        paths.push(PathBuf::from("/etc/rollcall/config.toml"));
    }
    paths
}

/// Resolve a string setting through the ARG → ENV → TOML → default chain
pub fn resolve_string(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_value: Option<&str>,
    default: &str,
) -> String {
    if let Some(v) = cli_arg {
        return v.to_string();
    }
    if let Ok(v) = std::env::var(env_var_name) {
        if !v.is_empty() {
            return v;
        }
    }
    if let Some(v) = toml_value {
        return v.to_string();
    }
    default.to_string()
}
