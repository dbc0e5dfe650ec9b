//! Sync status endpoint
//!
//! Reports the most recent sync session snapshot per troupe.

use crate::db::sessions;
use crate::AppState;
use axum::http::StatusCode;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

pub fn status_routes() -> Router<AppState> {
    Router::new().route("/status", get(status))
}

async fn status(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let sessions = sessions::load_sessions(&state.db).await.map_err(|e| {
        tracing::error!("Status query failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let entries: Vec<serde_json::Value> = sessions
        .iter()
        .map(|s| {
            json!({
                "troupe_id": s.troupe_id,
                "state": s.state.as_str(),
                "events_total": s.events_total,
                "events_processed": s.events_processed,
                "members_seen": s.members_seen,
                "issues": s.issues,
                "started_at": s.started_at.to_rfc3339(),
                "ended_at": s.ended_at.map(|t| t.to_rfc3339()),
            })
        })
        .collect();

    Ok(Json(json!({ "sessions": entries })))
}
