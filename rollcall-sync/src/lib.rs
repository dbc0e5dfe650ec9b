//! rollcall-sync library interface
//!
//! The attendance synchronization engine: discovers events from folder
//! sources, pulls per-event attendance from external spreadsheets and forms,
//! merges it into member identities, recomputes point totals, and persists
//! the result under a quota and a per-troupe advisory lock. The worker
//! binary consumes the sync queue and exposes a health/status surface.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod worker;

pub use crate::error::{SyncError, SyncResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Application state shared across status handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus carrying sync progress events
    pub event_bus: rollcall_common::events::EventBus,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: rollcall_common::events::EventBus) -> Self {
        Self {
            db,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build the worker's status router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::status_routes())
        .with_state(state)
}
