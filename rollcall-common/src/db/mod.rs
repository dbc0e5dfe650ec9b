//! Database access for Rollcall
//!
//! **[RCL-DB-010]** Shared SQLite database access. All Rollcall services open
//! the same database file; this module owns pool creation and the schema.

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the parent directory and the database file when missing, then
/// runs schema initialization.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize Rollcall tables
///
/// Idempotent; every statement is CREATE TABLE IF NOT EXISTS. Dynamic maps
/// (member properties, field maps, point totals) are stored as JSON TEXT.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS troupes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            origin_event_id TEXT,
            sync_lock INTEGER NOT NULL DEFAULT 0,
            lock_acquired_at TEXT,
            last_updated TEXT,
            member_properties TEXT NOT NULL DEFAULT '{}',
            point_types TEXT NOT NULL DEFAULT '{}',
            field_matchers TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_types (
            id TEXT PRIMARY KEY,
            troupe_id TEXT NOT NULL,
            title TEXT NOT NULL,
            value REAL NOT NULL DEFAULT 0,
            source_folder_uris TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            troupe_id TEXT NOT NULL,
            title TEXT NOT NULL,
            start_date TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'unset',
            source_uri TEXT NOT NULL DEFAULT '',
            event_type_id TEXT,
            value REAL NOT NULL DEFAULT 0,
            field_map TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS members (
            id TEXT PRIMARY KEY,
            troupe_id TEXT NOT NULL,
            properties TEXT NOT NULL DEFAULT '{}',
            points TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_buckets (
            id TEXT PRIMARY KEY,
            troupe_id TEXT NOT NULL,
            member_id TEXT NOT NULL,
            page INTEGER NOT NULL,
            events TEXT NOT NULL DEFAULT '{}',
            UNIQUE (member_id, page)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // troupe_id 'global' is the reserved cross-troupe row
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS troupe_limits (
            troupe_id TEXT PRIMARY KEY,
            modify_operations_left INTEGER NOT NULL DEFAULT 0,
            manual_syncs_left INTEGER NOT NULL DEFAULT 0,
            events_left INTEGER NOT NULL DEFAULT 0,
            event_types_left INTEGER NOT NULL DEFAULT 0,
            members_left INTEGER NOT NULL DEFAULT 0,
            source_uris_left INTEGER NOT NULL DEFAULT 0,
            refreshed_at TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            troupe_id TEXT NOT NULL,
            enqueued_at TEXT NOT NULL,
            claimed INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_sessions (
            troupe_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            events_total INTEGER NOT NULL DEFAULT 0,
            events_processed INTEGER NOT NULL DEFAULT 0,
            members_seen INTEGER NOT NULL DEFAULT 0,
            errors TEXT NOT NULL DEFAULT '[]',
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}
