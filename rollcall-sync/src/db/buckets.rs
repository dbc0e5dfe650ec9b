//! Attendance bucket persistence

use super::parse_uuid;
use crate::models::{AttendanceBucket, BucketEntry};
use rollcall_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

fn row_to_bucket(row: &sqlx::sqlite::SqliteRow) -> Result<AttendanceBucket> {
    let id: String = row.get("id");
    let troupe_id: String = row.get("troupe_id");
    let member_id: String = row.get("member_id");
    let events: BTreeMap<Uuid, BucketEntry> =
        serde_json::from_str(row.get::<&str, _>("events"))?;

    Ok(AttendanceBucket {
        id: parse_uuid(&id)?,
        troupe_id: parse_uuid(&troupe_id)?,
        member_id: parse_uuid(&member_id)?,
        page: row.get("page"),
        events,
    })
}

/// Load one member's bucket pages, lowest page first
pub async fn load_for_member(pool: &SqlitePool, member_id: Uuid) -> Result<Vec<AttendanceBucket>> {
    let rows = sqlx::query("SELECT * FROM attendance_buckets WHERE member_id = ? ORDER BY page")
        .bind(member_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_bucket).collect()
}

/// Bucket pages of a troupe that record one event
pub async fn buckets_containing_event(
    pool: &SqlitePool,
    troupe_id: Uuid,
    event_id: Uuid,
) -> Result<Vec<AttendanceBucket>> {
    let path = format!("$.\"{}\"", event_id);
    let rows = sqlx::query(
        "SELECT * FROM attendance_buckets WHERE troupe_id = ? AND json_extract(events, ?) IS NOT NULL",
    )
    .bind(troupe_id.to_string())
    .bind(path)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_bucket).collect()
}

/// Insert or replace a bucket page
pub async fn save_bucket(conn: &mut SqliteConnection, bucket: &AttendanceBucket) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO attendance_buckets (id, troupe_id, member_id, page, events)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(bucket.id.to_string())
    .bind(bucket.troupe_id.to_string())
    .bind(bucket.member_id.to_string())
    .bind(bucket.page)
    .bind(serde_json::to_string(&bucket.events)?)
    .execute(conn)
    .await?;

    Ok(())
}

/// Delete all bucket pages of one member
pub async fn delete_for_member(conn: &mut SqliteConnection, member_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM attendance_buckets WHERE member_id = ?")
        .bind(member_id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        rollcall_common::db::init_tables(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_bucket_round_trip_and_event_lookup() {
        let pool = test_pool().await;
        let troupe_id = Uuid::new_v4();
        let member_id = Uuid::new_v4();
        let event_id = Uuid::new_v4();

        let mut bucket = AttendanceBucket::new(troupe_id, member_id, 0);
        bucket.events.insert(
            event_id,
            BucketEntry {
                event_type_id: None,
                value: 2.0,
                start_date: Utc::now(),
            },
        );

        let mut conn = pool.acquire().await.unwrap();
        save_bucket(&mut conn, &bucket).await.unwrap();
        drop(conn);

        let loaded = load_for_member(&pool, member_id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].events[&event_id].value, 2.0);

        let hits = buckets_containing_event(&pool, troupe_id, event_id).await.unwrap();
        assert_eq!(hits.len(), 1);
        let misses = buckets_containing_event(&pool, troupe_id, Uuid::new_v4())
            .await
            .unwrap();
        assert!(misses.is_empty());
    }
}
