//! Event and event-type persistence

use super::{parse_datetime, parse_uuid};
use crate::models::{Event, EventSourceKind, EventType, FieldMapping};
use rollcall_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event> {
    let id: String = row.get("id");
    let troupe_id: String = row.get("troupe_id");
    let start_date: String = row.get("start_date");
    let event_type_id: Option<String> = row.get("event_type_id");
    let field_map: BTreeMap<String, FieldMapping> =
        serde_json::from_str(row.get::<&str, _>("field_map"))?;

    Ok(Event {
        id: parse_uuid(&id)?,
        troupe_id: parse_uuid(&troupe_id)?,
        title: row.get("title"),
        start_date: parse_datetime(&start_date)?,
        source: EventSourceKind::parse(row.get("source")),
        source_uri: row.get("source_uri"),
        event_type_id: event_type_id.as_deref().map(parse_uuid).transpose()?,
        value: row.get("value"),
        field_map,
    })
}

/// Load all events of a troupe, ordered by start date
pub async fn load_events(pool: &SqlitePool, troupe_id: Uuid) -> Result<Vec<Event>> {
    let rows = sqlx::query("SELECT * FROM events WHERE troupe_id = ? ORDER BY start_date, id")
        .bind(troupe_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_event).collect()
}

/// Insert or replace an event row
pub async fn save_event(conn: &mut SqliteConnection, event: &Event) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO events (
            id, troupe_id, title, start_date, source, source_uri,
            event_type_id, value, field_map
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id.to_string())
    .bind(event.troupe_id.to_string())
    .bind(&event.title)
    .bind(event.start_date.to_rfc3339())
    .bind(event.source.as_str())
    .bind(&event.source_uri)
    .bind(event.event_type_id.map(|id| id.to_string()))
    .bind(event.value)
    .bind(serde_json::to_string(&event.field_map)?)
    .execute(conn)
    .await?;

    Ok(())
}

/// Write back an event's refreshed field→property map
pub async fn update_field_map(
    conn: &mut SqliteConnection,
    event_id: Uuid,
    field_map: &BTreeMap<String, FieldMapping>,
) -> Result<()> {
    sqlx::query("UPDATE events SET field_map = ? WHERE id = ?")
        .bind(serde_json::to_string(field_map)?)
        .bind(event_id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}

/// Delete an event row (bucket entries are pruned by the caller)
pub async fn delete_event(conn: &mut SqliteConnection, event_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM events WHERE id = ?")
        .bind(event_id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}

/// Load all event types of a troupe
pub async fn load_event_types(pool: &SqlitePool, troupe_id: Uuid) -> Result<Vec<EventType>> {
    let rows = sqlx::query("SELECT * FROM event_types WHERE troupe_id = ? ORDER BY title")
        .bind(troupe_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            let troupe_id: String = row.get("troupe_id");
            let uris: Vec<String> = serde_json::from_str(row.get::<&str, _>("source_folder_uris"))?;
            Ok(EventType {
                id: parse_uuid(&id)?,
                troupe_id: parse_uuid(&troupe_id)?,
                title: row.get("title"),
                value: row.get("value"),
                source_folder_uris: uris,
            })
        })
        .collect()
}

/// Insert or replace an event type row
pub async fn save_event_type(pool: &SqlitePool, event_type: &EventType) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO event_types (id, troupe_id, title, value, source_folder_uris)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(event_type.id.to_string())
    .bind(event_type.troupe_id.to_string())
    .bind(&event_type.title)
    .bind(event_type.value)
    .bind(serde_json::to_string(&event_type.source_folder_uris)?)
    .execute(pool)
    .await?;

    Ok(())
}
