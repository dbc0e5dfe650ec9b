//! Event edit propagation
//!
//! **[RCS-PTS-020]** When an event's value, date, or type assignment changes,
//! point totals of recorded attendees are corrected by applying the delta —
//! a bulk update scoped by event identity, never a full recompute. This keeps
//! the correction correct under concurrent point-type edits: only the edited
//! event's contribution moves.

use crate::db::limits::QuotaDeltas;
use crate::db::{buckets, events, members};
use crate::error::{SyncError, SyncResult};
use crate::models::{Event, Troupe};
use crate::services::points::{self, EventPointsDelta};
use crate::services::quota::QuotaService;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Apply an event edit and propagate the point delta to its attendees
///
/// Quota-gated modify operation: pre-checked, mutated transactionally, then
/// accounted. Returns the number of members whose totals changed.
pub async fn apply_event_edit(
    pool: &SqlitePool,
    quota: &QuotaService,
    troupe: &Troupe,
    event_id: Uuid,
    new_value: f64,
    new_date: DateTime<Utc>,
    new_event_type_id: Option<Uuid>,
) -> SyncResult<usize> {
    let deltas = QuotaDeltas {
        modify_operations: -1,
        ..Default::default()
    };
    quota.require_within_limits(troupe.id, &deltas).await?;

    let all_events = events::load_events(pool, troupe.id).await?;
    let mut event = all_events
        .into_iter()
        .find(|e| e.id == event_id)
        .ok_or_else(|| SyncError::Client(format!("no such event: {}", event_id)))?;

    let delta = EventPointsDelta {
        old_value: event.value,
        new_value,
        old_date: event.start_date,
        new_date,
    };

    let affected = buckets::buckets_containing_event(pool, troupe.id, event_id).await?;
    let attendees = members::members_attending(pool, troupe.id, event_id).await?;

    event.value = new_value;
    event.start_date = new_date;
    event.event_type_id = new_event_type_id;

    let touched = persist_edit(pool, troupe, &event, delta, affected, attendees).await?;

    quota.increment(troupe.id, &deltas).await?;
    Ok(touched)
}

async fn persist_edit(
    pool: &SqlitePool,
    troupe: &Troupe,
    event: &Event,
    delta: EventPointsDelta,
    affected_buckets: Vec<crate::models::AttendanceBucket>,
    mut attendees: Vec<crate::models::Member>,
) -> SyncResult<usize> {
    let mut tx = pool.begin().await?;

    events::save_event(&mut tx, event).await?;

    for mut bucket in affected_buckets {
        if let Some(entry) = bucket.events.get_mut(&event.id) {
            entry.value = event.value;
            entry.start_date = event.start_date;
            entry.event_type_id = event.event_type_id;
        }
        buckets::save_bucket(&mut tx, &bucket).await?;
    }

    for member in &mut attendees {
        points::apply_delta(&mut member.points, &troupe.point_types, delta);
        members::save_member(&mut tx, member).await?;
    }

    tx.commit().await?;
    Ok(attendees.len())
}

/// Delete an event, unsetting bucket entries and withdrawing its points
pub async fn remove_event(
    pool: &SqlitePool,
    quota: &QuotaService,
    troupe: &Troupe,
    event_id: Uuid,
) -> SyncResult<()> {
    let deltas = QuotaDeltas {
        modify_operations: -1,
        events: 1, // a deleted event restores capacity
        ..Default::default()
    };
    quota.require_within_limits(troupe.id, &deltas).await?;

    let affected = buckets::buckets_containing_event(pool, troupe.id, event_id).await?;
    let attendees = members::members_attending(pool, troupe.id, event_id).await?;

    let mut tx = pool.begin().await?;

    for mut bucket in affected {
        if let Some(entry) = bucket.events.remove(&event_id) {
            // Withdraw the event's contribution from its owner's totals
            if let Some(member) = attendees.iter().find(|m| m.id == bucket.member_id) {
                let mut member = member.clone();
                points::credit(
                    &mut member.points,
                    &troupe.point_types,
                    entry.start_date,
                    -entry.value,
                );
                members::save_member(&mut tx, &member).await?;
            }
        }
        buckets::save_bucket(&mut tx, &bucket).await?;
    }

    events::delete_event(&mut tx, event_id).await?;
    tx.commit().await?;

    quota.increment(troupe.id, &deltas).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AttendanceBucket, BucketEntry, EventSourceKind, Member, PointBucket,
    };
    use std::collections::BTreeMap;

    async fn fixture() -> (SqlitePool, QuotaService, Troupe, Event, Member) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        rollcall_common::db::init_tables(&pool).await.unwrap();

        let quota = QuotaService::new(pool.clone());

        let mut point_types = BTreeMap::new();
        point_types.insert(
            "Spring".to_string(),
            PointBucket {
                start_date: "2026-01-01T00:00:00Z".parse().unwrap(),
                end_date: "2026-06-30T23:59:59Z".parse().unwrap(),
            },
        );
        let troupe = Troupe {
            id: Uuid::new_v4(),
            name: "Test".to_string(),
            origin_event_id: None,
            sync_lock: false,
            lock_acquired_at: None,
            last_updated: None,
            member_properties: BTreeMap::new(),
            point_types,
            field_matchers: Vec::new(),
        };
        quota.ensure_scopes(troupe.id).await.unwrap();

        let event = Event {
            id: Uuid::new_v4(),
            troupe_id: troupe.id,
            title: "Rehearsal".to_string(),
            start_date: "2026-03-14T00:00:00Z".parse().unwrap(),
            source: EventSourceKind::Spreadsheet,
            source_uri: String::new(),
            event_type_id: None,
            value: 2.0,
            field_map: BTreeMap::new(),
        };

        let mut member = Member {
            id: Uuid::new_v4(),
            troupe_id: troupe.id,
            properties: BTreeMap::new(),
            points: BTreeMap::new(),
        };
        member.points.insert("Spring".to_string(), 2.0);

        let mut bucket = AttendanceBucket::new(troupe.id, member.id, 0);
        bucket.events.insert(
            event.id,
            BucketEntry {
                event_type_id: None,
                value: event.value,
                start_date: event.start_date,
            },
        );

        let mut conn = pool.acquire().await.unwrap();
        events::save_event(&mut conn, &event).await.unwrap();
        members::save_member(&mut conn, &member).await.unwrap();
        buckets::save_bucket(&mut conn, &bucket).await.unwrap();
        drop(conn);

        (pool, quota, troupe, event, member)
    }

    #[tokio::test]
    async fn test_value_edit_applies_delta_to_attendees() {
        let (pool, quota, troupe, event, member) = fixture().await;

        let touched = apply_event_edit(
            &pool,
            &quota,
            &troupe,
            event.id,
            5.0,
            event.start_date,
            None,
        )
        .await
        .unwrap();

        assert_eq!(touched, 1);
        let reloaded = members::load_members(&pool, troupe.id).await.unwrap();
        assert_eq!(reloaded[0].id, member.id);
        assert_eq!(reloaded[0].points["Spring"], 5.0);

        // Bucket entry reflects the new value
        let pages = buckets::load_for_member(&pool, member.id).await.unwrap();
        assert_eq!(pages[0].events[&event.id].value, 5.0);
    }

    #[tokio::test]
    async fn test_date_edit_moves_points_out_of_bucket() {
        let (pool, quota, troupe, event, _member) = fixture().await;

        apply_event_edit(
            &pool,
            &quota,
            &troupe,
            event.id,
            event.value,
            "2026-09-01T00:00:00Z".parse().unwrap(),
            None,
        )
        .await
        .unwrap();

        let reloaded = members::load_members(&pool, troupe.id).await.unwrap();
        assert_eq!(reloaded[0].points["Spring"], 0.0);
    }

    #[tokio::test]
    async fn test_remove_event_withdraws_points_and_unsets_entry() {
        let (pool, quota, troupe, event, member) = fixture().await;

        remove_event(&pool, &quota, &troupe, event.id).await.unwrap();

        let reloaded = members::load_members(&pool, troupe.id).await.unwrap();
        assert_eq!(reloaded[0].points["Spring"], 0.0);

        let pages = buckets::load_for_member(&pool, member.id).await.unwrap();
        assert!(pages[0].events.is_empty());
        assert!(events::load_events(&pool, troupe.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_of_unknown_event_is_client_error() {
        let (pool, quota, troupe, _event, _member) = fixture().await;

        let result = apply_event_edit(
            &pool,
            &quota,
            &troupe,
            Uuid::new_v4(),
            1.0,
            Utc::now(),
            None,
        )
        .await;

        assert!(matches!(result, Err(SyncError::Client(_))));
    }
}
