//! Event and event-type aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Kind of external data source backing an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSourceKind {
    Spreadsheet,
    Form,
    Unset,
}

impl EventSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSourceKind::Spreadsheet => "spreadsheet",
            EventSourceKind::Form => "form",
            EventSourceKind::Unset => "unset",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "spreadsheet" => EventSourceKind::Spreadsheet,
            "form" => EventSourceKind::Form,
            _ => EventSourceKind::Unset,
        }
    }
}

/// Resolved mapping of one external field onto a member property
///
/// Invariant (event-wide): at most one field maps to any given property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Human-readable field label as last seen in the source
    pub label: String,
    /// Priority of the matcher that produced the mapping, None if manual/unmapped
    pub matcher_priority: Option<u32>,
    /// Set when a user pinned this mapping; sync never touches it
    #[serde(default)]
    pub overridden: bool,
    /// Target member property, None while unmapped
    pub property: Option<String>,
}

/// A single attendance-taking occasion, backed by one external source
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub troupe_id: Uuid,
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub source: EventSourceKind,
    pub source_uri: String,
    pub event_type_id: Option<Uuid>,
    /// Points awarded for attending
    pub value: f64,
    /// External field id → mapping state
    pub field_map: BTreeMap<String, FieldMapping>,
}

/// Template defining default point value and discovery folders for events
#[derive(Debug, Clone)]
pub struct EventType {
    pub id: Uuid,
    pub troupe_id: Uuid,
    pub title: String,
    pub value: f64,
    /// Folder URIs scanned during discovery
    pub source_folder_uris: Vec<String>,
}
