//! rollcall-sync - Attendance Synchronization Worker
//!
//! Consumes the sync queue, runs one attendance sync per dequeued troupe,
//! sweeps stale sync locks, refreshes quota counters on a schedule, and
//! serves health/status probes.

use anyhow::Result;
use clap::Parser;
use rollcall_common::config::TomlConfig;
use rollcall_common::events::EventBus;
use rollcall_sync::config::EngineConfig;
use rollcall_sync::services::log_sheet::LogSheetClient;
use rollcall_sync::services::sources::HttpSourceGateway;
use rollcall_sync::services::{SyncOrchestrator, SyncSettings};
use rollcall_sync::{worker, AppState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rollcall-sync", about = "Rollcall attendance synchronization worker")]
struct Args {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// SQLite database path
    #[arg(long)]
    database: Option<String>,

    /// Status/health HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Starting rollcall-sync (Attendance Synchronization Worker)");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let toml_config = match &args.config {
        Some(path) => TomlConfig::load(path)?,
        None => TomlConfig::load_default(),
    };
    let config = EngineConfig::resolve(args.database.as_deref(), args.port, &toml_config);

    tracing::info!("Database: {}", config.database_path.display());
    let db = rollcall_common::db::init_database_pool(&config.database_path).await?;

    let event_bus = EventBus::new(500);

    let gateway = Arc::new(HttpSourceGateway::new(config.source_timeout)?);
    let log_sheet = match &config.log_sheet_base_url {
        Some(base_url) => Some(LogSheetClient::new(base_url.clone(), config.source_timeout)?),
        None => {
            tracing::info!("Log sheet service not configured, log rendering disabled");
            None
        }
    };

    let orchestrator = Arc::new(SyncOrchestrator::new(
        db.clone(),
        event_bus.clone(),
        gateway,
        log_sheet,
        SyncSettings {
            ingest_parallelism: config.ingest_parallelism,
        },
    ));

    let cancel = CancellationToken::new();

    let consumer = tokio::spawn(worker::run_queue_consumer(
        db.clone(),
        orchestrator.clone(),
        config.queue_poll_interval,
        cancel.clone(),
    ));
    let sweep = tokio::spawn(worker::run_stale_lock_sweep(
        db.clone(),
        event_bus.clone(),
        config.lock_sweep_interval,
        config.max_sync_duration_secs,
        cancel.clone(),
    ));
    let refresh = tokio::spawn(worker::run_quota_refresh(
        db.clone(),
        orchestrator.quota().clone(),
        config.quota_refresh_interval,
        cancel.clone(),
    ));

    let state = AppState::new(db, event_bus);
    let app = rollcall_sync::build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.status_port));
    tracing::info!("Status surface listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    let _ = tokio::join!(consumer, sweep, refresh);
    tracing::info!("rollcall-sync stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
