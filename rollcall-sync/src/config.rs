//! Configuration resolution for the sync worker
//!
//! **[RCS-CFG-010]** Every setting resolves CLI → ENV → TOML → default, per
//! the shared Rollcall resolution order.

use rollcall_common::config::TomlConfig;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATABASE_PATH: &str = "rollcall.db";
const DEFAULT_QUEUE_POLL_SECS: u64 = 5;
const DEFAULT_MAX_SYNC_DURATION_SECS: i64 = 1800;
const DEFAULT_LOCK_SWEEP_SECS: u64 = 300;
const DEFAULT_QUOTA_REFRESH_SECS: u64 = 86400;
const DEFAULT_INGEST_PARALLELISM: usize = 4;
const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STATUS_PORT: u16 = 5850;

/// Resolved worker configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub queue_poll_interval: Duration,
    /// Locks held longer than this are force-cleared by the sweep
    pub max_sync_duration_secs: i64,
    pub lock_sweep_interval: Duration,
    pub quota_refresh_interval: Duration,
    pub ingest_parallelism: usize,
    pub source_timeout: Duration,
    pub status_port: u16,
    pub log_sheet_base_url: Option<String>,
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl EngineConfig {
    /// Resolve from CLI overrides and a loaded TOML config
    pub fn resolve(
        cli_database: Option<&str>,
        cli_port: Option<u16>,
        toml: &TomlConfig,
    ) -> Self {
        let database_path = PathBuf::from(rollcall_common::config::resolve_string(
            cli_database,
            "ROLLCALL_DATABASE_PATH",
            toml.database_path.as_deref(),
            DEFAULT_DATABASE_PATH,
        ));

        let status_port = cli_port
            .or_else(|| env_u64("ROLLCALL_STATUS_PORT").map(|p| p as u16))
            .or(toml.status_port)
            .unwrap_or(DEFAULT_STATUS_PORT);

        Self {
            database_path,
            queue_poll_interval: Duration::from_secs(
                env_u64("ROLLCALL_QUEUE_POLL_SECS")
                    .or(toml.queue_poll_interval_secs)
                    .unwrap_or(DEFAULT_QUEUE_POLL_SECS),
            ),
            max_sync_duration_secs: env_u64("ROLLCALL_MAX_SYNC_DURATION_SECS")
                .map(|v| v as i64)
                .or(toml.max_sync_duration_secs)
                .unwrap_or(DEFAULT_MAX_SYNC_DURATION_SECS),
            lock_sweep_interval: Duration::from_secs(
                env_u64("ROLLCALL_LOCK_SWEEP_SECS")
                    .or(toml.lock_sweep_interval_secs)
                    .unwrap_or(DEFAULT_LOCK_SWEEP_SECS),
            ),
            quota_refresh_interval: Duration::from_secs(
                env_u64("ROLLCALL_QUOTA_REFRESH_SECS")
                    .or(toml.quota_refresh_interval_secs)
                    .unwrap_or(DEFAULT_QUOTA_REFRESH_SECS),
            ),
            ingest_parallelism: env_u64("ROLLCALL_INGEST_PARALLELISM")
                .map(|v| v as usize)
                .or(toml.ingest_parallelism)
                .unwrap_or(DEFAULT_INGEST_PARALLELISM),
            source_timeout: Duration::from_secs(
                env_u64("ROLLCALL_SOURCE_TIMEOUT_SECS")
                    .or(toml.source_timeout_secs)
                    .unwrap_or(DEFAULT_SOURCE_TIMEOUT_SECS),
            ),
            status_port,
            log_sheet_base_url: std::env::var("ROLLCALL_LOG_SHEET_URL")
                .ok()
                .or_else(|| toml.log_sheet_base_url.clone()),
        }
    }
}
