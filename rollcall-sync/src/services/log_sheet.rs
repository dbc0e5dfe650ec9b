//! Log sheet service client
//!
//! External spreadsheet-rendering log writer, invoked after a sync's
//! persisting transaction commits. Log failures never roll back a sync; the
//! caller logs and moves on.

use crate::models::{Event, Member};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LogSheetError {
    #[error("log sheet service unreachable: {0}")]
    Unreachable(String),

    #[error("log sheet service answered {0}")]
    Rejected(u16),
}

#[derive(Serialize)]
struct LogPayload<'a> {
    troupe_id: Uuid,
    events: Vec<LogEvent<'a>>,
    audience: Vec<LogAttendee<'a>>,
}

#[derive(Serialize)]
struct LogEvent<'a> {
    id: Uuid,
    title: &'a str,
    start_date: String,
    value: f64,
}

#[derive(Serialize)]
struct LogAttendee<'a> {
    id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    member_id: Option<String>,
    points: &'a std::collections::BTreeMap<String, f64>,
}

/// Client for the external log sheet service
pub struct LogSheetClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl LogSheetClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LogSheetError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("Rollcall/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| LogSheetError::Unreachable(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
        })
    }

    /// Render the troupe's log after a completed sync
    pub async fn update_log(
        &self,
        troupe_id: Uuid,
        events: &[Event],
        audience: &[Member],
    ) -> Result<(), LogSheetError> {
        let payload = LogPayload {
            troupe_id,
            events: events
                .iter()
                .map(|e| LogEvent {
                    id: e.id,
                    title: &e.title,
                    start_date: e.start_date.to_rfc3339(),
                    value: e.value,
                })
                .collect(),
            audience: audience
                .iter()
                .map(|m| LogAttendee {
                    id: m.id,
                    member_id: m.identifying_value(),
                    points: &m.points,
                })
                .collect(),
        };

        self.post(&format!("{}/logs/{}", self.base_url, troupe_id), &payload)
            .await
    }

    /// Create the log sheet for a new troupe
    pub async fn create_log(&self, troupe_id: Uuid) -> Result<(), LogSheetError> {
        self.post(&format!("{}/logs", self.base_url), &serde_json::json!({ "troupe_id": troupe_id }))
            .await
    }

    /// Drop the log sheet of a deleted troupe
    pub async fn delete_log(&self, troupe_id: Uuid) -> Result<(), LogSheetError> {
        let response = self
            .http_client
            .delete(format!("{}/logs/{}", self.base_url, troupe_id))
            .send()
            .await
            .map_err(|e| LogSheetError::Unreachable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LogSheetError::Rejected(response.status().as_u16()))
        }
    }

    async fn post<T: Serialize>(&self, url: &str, payload: &T) -> Result<(), LogSheetError> {
        let response = self
            .http_client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| LogSheetError::Unreachable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LogSheetError::Rejected(response.status().as_u16()))
        }
    }
}
