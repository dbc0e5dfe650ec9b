//! Member persistence

use super::parse_uuid;
use crate::models::{Member, MemberProperty};
use rollcall_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

fn row_to_member(row: &sqlx::sqlite::SqliteRow) -> Result<Member> {
    let id: String = row.get("id");
    let troupe_id: String = row.get("troupe_id");
    let properties: BTreeMap<String, MemberProperty> =
        serde_json::from_str(row.get::<&str, _>("properties"))?;
    let points: BTreeMap<String, f64> = serde_json::from_str(row.get::<&str, _>("points"))?;

    Ok(Member {
        id: parse_uuid(&id)?,
        troupe_id: parse_uuid(&troupe_id)?,
        properties,
        points,
    })
}

/// Load all members of a troupe
pub async fn load_members(pool: &SqlitePool, troupe_id: Uuid) -> Result<Vec<Member>> {
    let rows = sqlx::query("SELECT * FROM members WHERE troupe_id = ? ORDER BY id")
        .bind(troupe_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_member).collect()
}

/// Insert or replace a member row
pub async fn save_member(conn: &mut SqliteConnection, member: &Member) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO members (id, troupe_id, properties, points) VALUES (?, ?, ?, ?)",
    )
    .bind(member.id.to_string())
    .bind(member.troupe_id.to_string())
    .bind(serde_json::to_string(&member.properties)?)
    .bind(serde_json::to_string(&member.points)?)
    .execute(conn)
    .await?;

    Ok(())
}

/// Delete a member row (their buckets are pruned by the caller)
pub async fn delete_member(conn: &mut SqliteConnection, member_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM members WHERE id = ?")
        .bind(member_id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}

/// Members recorded as attendees of one event
///
/// Scoped by event identity through the bucket pages, so point-delta updates
/// touch only actual attendees.
pub async fn members_attending(
    pool: &SqlitePool,
    troupe_id: Uuid,
    event_id: Uuid,
) -> Result<Vec<Member>> {
    let path = format!("$.\"{}\"", event_id);
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT m.* FROM members m
        JOIN attendance_buckets b ON b.member_id = m.id
        WHERE b.troupe_id = ? AND json_extract(b.events, ?) IS NOT NULL
        ORDER BY m.id
        "#,
    )
    .bind(troupe_id.to_string())
    .bind(path)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_member).collect()
}
