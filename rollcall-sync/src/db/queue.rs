//! Sync queue persistence
//!
//! The queue table is the cross-process task transport: producers enqueue
//! `{troupe_id}` requests, the worker is the consumer. Delivery is
//! at-least-once; the sync itself is idempotent.

use super::parse_uuid;
use rollcall_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// A claimed sync request
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest {
    pub id: i64,
    pub troupe_id: Uuid,
}

/// Enqueue a sync request for a troupe
pub async fn enqueue(pool: &SqlitePool, troupe_id: Uuid) -> Result<()> {
    sqlx::query("INSERT INTO sync_queue (troupe_id, enqueued_at) VALUES (?, ?)")
        .bind(troupe_id.to_string())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

    Ok(())
}

/// Claim the oldest unclaimed request, if any
pub async fn claim_next(pool: &SqlitePool) -> Result<Option<SyncRequest>> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        "SELECT id, troupe_id FROM sync_queue WHERE claimed = 0 ORDER BY id LIMIT 1",
    )
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: i64 = row.get("id");
    let troupe_id: String = row.get("troupe_id");

    sqlx::query("UPDATE sync_queue SET claimed = 1 WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Some(SyncRequest {
        id,
        troupe_id: parse_uuid(&troupe_id)?,
    }))
}

/// Remove a finished request
pub async fn complete(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Unclaim a request that could not be processed (redelivered later)
pub async fn release(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE sync_queue SET claimed = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
