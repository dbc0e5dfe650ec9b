//! Troupe persistence and the advisory sync lock
//!
//! **[RCS-LCK-010]** The sync lock is a persisted flag toggled by a
//! conditional write ("set only if currently unset"), so it survives process
//! restarts and is honored across workers sharing the database.

use super::{parse_datetime_opt, parse_uuid};
use crate::models::{FieldMatcher, PointBucket, PropertyType, Troupe};
use chrono::Utc;
use rollcall_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

fn row_to_troupe(row: &sqlx::sqlite::SqliteRow) -> Result<Troupe> {
    let id: String = row.get("id");
    let origin: Option<String> = row.get("origin_event_id");
    let lock_acquired_at: Option<String> = row.get("lock_acquired_at");
    let last_updated: Option<String> = row.get("last_updated");

    let member_properties: BTreeMap<String, PropertyType> =
        serde_json::from_str(row.get::<&str, _>("member_properties"))?;
    let point_types: BTreeMap<String, PointBucket> =
        serde_json::from_str(row.get::<&str, _>("point_types"))?;
    let field_matchers: Vec<FieldMatcher> =
        serde_json::from_str(row.get::<&str, _>("field_matchers"))?;

    Ok(Troupe {
        id: parse_uuid(&id)?,
        name: row.get("name"),
        origin_event_id: origin.as_deref().map(parse_uuid).transpose()?,
        sync_lock: row.get::<i64, _>("sync_lock") != 0,
        lock_acquired_at: parse_datetime_opt(lock_acquired_at)?,
        last_updated: parse_datetime_opt(last_updated)?,
        member_properties,
        point_types,
        field_matchers,
    })
}

/// Load one troupe by id
pub async fn load_troupe(pool: &SqlitePool, id: Uuid) -> Result<Option<Troupe>> {
    let row = sqlx::query("SELECT * FROM troupes WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_troupe).transpose()
}

/// Insert or replace a troupe row
pub async fn save_troupe(pool: &SqlitePool, troupe: &Troupe) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO troupes (
            id, name, origin_event_id, sync_lock, lock_acquired_at, last_updated,
            member_properties, point_types, field_matchers
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(troupe.id.to_string())
    .bind(&troupe.name)
    .bind(troupe.origin_event_id.map(|id| id.to_string()))
    .bind(troupe.sync_lock as i64)
    .bind(troupe.lock_acquired_at.map(|t| t.to_rfc3339()))
    .bind(troupe.last_updated.map(|t| t.to_rfc3339()))
    .bind(serde_json::to_string(&troupe.member_properties)?)
    .bind(serde_json::to_string(&troupe.point_types)?)
    .bind(serde_json::to_string(&troupe.field_matchers)?)
    .execute(pool)
    .await?;

    Ok(())
}

/// Ids of every troupe (quota refresh iterates these)
pub async fn all_troupe_ids(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let rows = sqlx::query("SELECT id FROM troupes ORDER BY id")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| parse_uuid(row.get("id")))
        .collect()
}

/// Attempt the LOCKED transition: set the sync lock only if currently unset
///
/// Returns false when another sync holds the lock (no queuing, no waiting).
pub async fn try_acquire_sync_lock(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE troupes SET sync_lock = 1, lock_acquired_at = ? WHERE id = ? AND sync_lock = 0",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Release the sync lock unconditionally
///
/// Runs as its own statement (never inside the persisting transaction) so a
/// failed commit still releases the troupe.
pub async fn release_sync_lock(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE troupes SET sync_lock = 0, lock_acquired_at = NULL WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Clear the sync lock inside the persisting transaction
///
/// The success path releases the lock atomically with the data write; the
/// failure path uses [`release_sync_lock`] instead.
pub async fn release_sync_lock_in(conn: &mut SqliteConnection, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE troupes SET sync_lock = 0, lock_acquired_at = NULL WHERE id = ?")
        .bind(id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}

/// Force-clear locks held longer than `max_duration_secs`
///
/// The stale-lock sweep treats such syncs as abandoned. Returns the affected
/// troupes with how long each lock had been held.
pub async fn clear_stale_locks(
    pool: &SqlitePool,
    max_duration_secs: i64,
) -> Result<Vec<(Uuid, i64)>> {
    let now = Utc::now();
    let cutoff = (now - chrono::Duration::seconds(max_duration_secs)).to_rfc3339();

    let rows = sqlx::query(
        "SELECT id, lock_acquired_at FROM troupes WHERE sync_lock = 1 AND lock_acquired_at < ?",
    )
    .bind(&cutoff)
    .fetch_all(pool)
    .await?;

    let mut cleared = Vec::new();
    for row in rows {
        let id: String = row.get("id");
        let acquired: Option<String> = row.get("lock_acquired_at");
        let troupe_id = parse_uuid(&id)?;

        let result = sqlx::query(
            "UPDATE troupes SET sync_lock = 0, lock_acquired_at = NULL WHERE id = ? AND sync_lock = 1",
        )
        .bind(&id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            let held = parse_datetime_opt(acquired)?
                .map(|t| (now - t).num_seconds())
                .unwrap_or(0);
            cleared.push((troupe_id, held));
        }
    }

    Ok(cleared)
}

/// Write back the (possibly auto-expanded) member property schema
pub async fn update_member_properties(
    conn: &mut SqliteConnection,
    troupe: &Troupe,
) -> Result<()> {
    sqlx::query("UPDATE troupes SET member_properties = ? WHERE id = ?")
        .bind(serde_json::to_string(&troupe.member_properties)?)
        .bind(troupe.id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}

/// Stamp the troupe's last successful sync time
pub async fn touch_last_updated(conn: &mut SqliteConnection, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE troupes SET last_updated = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}
