//! Quota counter persistence
//!
//! **[RCS-QTA-010]** One row per troupe plus one reserved global row, each a
//! set of named remaining-operation counters. The only mutation primitive is
//! an atomic increment-with-floor-check: a single conditional UPDATE that
//! applies every delta or none of them.

use rollcall_common::Result;
use sqlx::{Row, SqlitePool};

/// Reserved troupe_id of the cross-troupe counter row
pub const GLOBAL_SCOPE: &str = "global";

/// Named remaining-operation counters for one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TroupeLimits {
    pub modify_operations_left: i64,
    pub manual_syncs_left: i64,
    pub events_left: i64,
    pub event_types_left: i64,
    pub members_left: i64,
    pub source_uris_left: i64,
}

/// Signed counter deltas; negative consumes, positive restores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaDeltas {
    pub modify_operations: i64,
    pub manual_syncs: i64,
    pub events: i64,
    pub event_types: i64,
    pub members: i64,
    pub source_uris: i64,
}

impl QuotaDeltas {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Accumulate another delta set into this one
    pub fn merge(&mut self, other: &QuotaDeltas) {
        self.modify_operations += other.modify_operations;
        self.manual_syncs += other.manual_syncs;
        self.events += other.events;
        self.event_types += other.event_types;
        self.members += other.members;
        self.source_uris += other.source_uris;
    }
}

fn row_to_limits(row: &sqlx::sqlite::SqliteRow) -> TroupeLimits {
    TroupeLimits {
        modify_operations_left: row.get("modify_operations_left"),
        manual_syncs_left: row.get("manual_syncs_left"),
        events_left: row.get("events_left"),
        event_types_left: row.get("event_types_left"),
        members_left: row.get("members_left"),
        source_uris_left: row.get("source_uris_left"),
    }
}

/// Load the counters of one scope
pub async fn get_limits(pool: &SqlitePool, scope: &str) -> Result<Option<TroupeLimits>> {
    let row = sqlx::query("SELECT * FROM troupe_limits WHERE troupe_id = ?")
        .bind(scope)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(row_to_limits))
}

/// Create or reset a scope's counters to a baseline
pub async fn reset_limits(pool: &SqlitePool, scope: &str, baseline: TroupeLimits) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO troupe_limits (
            troupe_id, modify_operations_left, manual_syncs_left, events_left,
            event_types_left, members_left, source_uris_left, refreshed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(scope)
    .bind(baseline.modify_operations_left)
    .bind(baseline.manual_syncs_left)
    .bind(baseline.events_left)
    .bind(baseline.event_types_left)
    .bind(baseline.members_left)
    .bind(baseline.source_uris_left)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Side-effect-free check: would applying `deltas` keep every counter ≥ 0?
pub async fn would_stay_within(
    pool: &SqlitePool,
    scope: &str,
    deltas: &QuotaDeltas,
) -> Result<bool> {
    let Some(limits) = get_limits(pool, scope).await? else {
        return Ok(false);
    };

    Ok(limits.modify_operations_left + deltas.modify_operations >= 0
        && limits.manual_syncs_left + deltas.manual_syncs >= 0
        && limits.events_left + deltas.events >= 0
        && limits.event_types_left + deltas.event_types >= 0
        && limits.members_left + deltas.members >= 0
        && limits.source_uris_left + deltas.source_uris >= 0)
}

/// Atomically apply `deltas` to a scope, refusing any counter below zero
///
/// Returns false when the conditional UPDATE matched no row (floor violated
/// or scope missing); the counters are untouched in that case.
pub async fn apply_deltas(pool: &SqlitePool, scope: &str, deltas: &QuotaDeltas) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE troupe_limits SET
            modify_operations_left = modify_operations_left + ?,
            manual_syncs_left = manual_syncs_left + ?,
            events_left = events_left + ?,
            event_types_left = event_types_left + ?,
            members_left = members_left + ?,
            source_uris_left = source_uris_left + ?
        WHERE troupe_id = ?
            AND modify_operations_left + ? >= 0
            AND manual_syncs_left + ? >= 0
            AND events_left + ? >= 0
            AND event_types_left + ? >= 0
            AND members_left + ? >= 0
            AND source_uris_left + ? >= 0
        "#,
    )
    .bind(deltas.modify_operations)
    .bind(deltas.manual_syncs)
    .bind(deltas.events)
    .bind(deltas.event_types)
    .bind(deltas.members)
    .bind(deltas.source_uris)
    .bind(scope)
    .bind(deltas.modify_operations)
    .bind(deltas.manual_syncs)
    .bind(deltas.events)
    .bind(deltas.event_types)
    .bind(deltas.members)
    .bind(deltas.source_uris)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
