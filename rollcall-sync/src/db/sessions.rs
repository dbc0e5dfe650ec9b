//! Sync session snapshots
//!
//! Diagnostic record of the most recent sync run per troupe, written by the
//! orchestrator as it crosses phase boundaries. Not part of the consistency
//! story; a lost snapshot costs nothing but visibility.

use super::{parse_datetime, parse_datetime_opt, parse_uuid};
use crate::models::{SyncIssue, SyncSession, SyncState};
use rollcall_common::Result;
use sqlx::{Row, SqlitePool};

fn state_from_str(raw: &str) -> SyncState {
    match raw {
        "LOCKED" => SyncState::Locked,
        "DISCOVERING" => SyncState::Discovering,
        "INGESTING" => SyncState::Ingesting,
        "RECONCILING" => SyncState::Reconciling,
        "PERSISTING" => SyncState::Persisting,
        "UNLOCKED" => SyncState::Unlocked,
        "FAILED" => SyncState::Failed,
        _ => SyncState::Idle,
    }
}

/// Write (or overwrite) a troupe's session snapshot
pub async fn save_session(pool: &SqlitePool, session: &SyncSession) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO sync_sessions (
            troupe_id, state, events_total, events_processed, members_seen,
            errors, started_at, ended_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.troupe_id.to_string())
    .bind(session.state.as_str())
    .bind(session.events_total as i64)
    .bind(session.events_processed as i64)
    .bind(session.members_seen as i64)
    .bind(serde_json::to_string(&session.issues)?)
    .bind(session.started_at.to_rfc3339())
    .bind(session.ended_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load all session snapshots, most recent first
pub async fn load_sessions(pool: &SqlitePool) -> Result<Vec<SyncSession>> {
    let rows = sqlx::query("SELECT * FROM sync_sessions ORDER BY started_at DESC")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            let troupe_id: String = row.get("troupe_id");
            let started_at: String = row.get("started_at");
            let ended_at: Option<String> = row.get("ended_at");
            let issues: Vec<SyncIssue> = serde_json::from_str(row.get::<&str, _>("errors"))?;

            Ok(SyncSession {
                troupe_id: parse_uuid(&troupe_id)?,
                state: state_from_str(row.get("state")),
                events_total: row.get::<i64, _>("events_total") as usize,
                events_processed: row.get::<i64, _>("events_processed") as usize,
                members_seen: row.get::<i64, _>("members_seen") as usize,
                issues,
                started_at: parse_datetime(&started_at)?,
                ended_at: parse_datetime_opt(ended_at)?,
            })
        })
        .collect()
}
