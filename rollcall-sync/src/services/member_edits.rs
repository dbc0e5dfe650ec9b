//! Member removal
//!
//! Deleting a member drops the member row and every one of their attendance
//! bucket pages in one transaction.

use crate::db::limits::QuotaDeltas;
use crate::db::{buckets, members};
use crate::error::{SyncError, SyncResult};
use crate::services::quota::QuotaService;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Quota-gated member deletion
pub async fn remove_member(
    pool: &SqlitePool,
    quota: &QuotaService,
    troupe_id: Uuid,
    member_id: Uuid,
) -> SyncResult<()> {
    let deltas = QuotaDeltas {
        modify_operations: -1,
        members: 1, // a deleted member restores capacity
        ..Default::default()
    };
    quota.require_within_limits(troupe_id, &deltas).await?;

    let exists = members::load_members(pool, troupe_id)
        .await?
        .iter()
        .any(|m| m.id == member_id);
    if !exists {
        return Err(SyncError::Client(format!("no such member: {}", member_id)));
    }

    let mut tx = pool.begin().await?;
    buckets::delete_for_member(&mut tx, member_id).await?;
    members::delete_member(&mut tx, member_id).await?;
    tx.commit().await?;

    quota.increment(troupe_id, &deltas).await?;
    Ok(())
}
