//! Member, property value, and attendance bucket aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Reserved property carrying the identifying value for merges
pub const MEMBER_ID_PROPERTY: &str = "Member ID";

/// Maximum attended-event entries per attendance bucket page
pub const MAX_PAGE_SIZE: usize = 30;

/// A typed, coerced property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Date(DateTime<Utc>),
    /// Valid absence of a value (optional property, empty cell)
    Absent,
}

impl PropertyValue {
    /// String form used for identity keying and display
    pub fn as_key(&self) -> Option<String> {
        match self {
            PropertyValue::Text(s) => Some(s.clone()),
            PropertyValue::Number(n) => Some(n.to_string()),
            PropertyValue::Flag(b) => Some(b.to_string()),
            PropertyValue::Date(d) => Some(d.to_rfc3339()),
            PropertyValue::Absent => None,
        }
    }
}

/// A member property value together with its override flag
///
/// `overridden` marks a value set manually or by the troupe's origin event;
/// ordinary sync merges never replace such values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberProperty {
    pub value: PropertyValue,
    #[serde(default)]
    pub overridden: bool,
}

/// A tracked individual, identified by the designated identifying property
#[derive(Debug, Clone)]
pub struct Member {
    pub id: Uuid,
    pub troupe_id: Uuid,
    pub properties: BTreeMap<String, MemberProperty>,
    /// Point bucket name → accumulated total
    pub points: BTreeMap<String, f64>,
}

impl Member {
    pub fn identifying_value(&self) -> Option<String> {
        self.properties
            .get(MEMBER_ID_PROPERTY)
            .and_then(|p| p.value.as_key())
    }
}

/// One attended event as recorded in a bucket page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketEntry {
    pub event_type_id: Option<Uuid>,
    pub value: f64,
    pub start_date: DateTime<Utc>,
}

/// An event credit pending insertion for a member
#[derive(Debug, Clone)]
pub struct AttendedEvent {
    pub event_id: Uuid,
    pub event_type_id: Option<Uuid>,
    pub value: f64,
    pub start_date: DateTime<Utc>,
}

impl AttendedEvent {
    pub fn entry(&self) -> BucketEntry {
        BucketEntry {
            event_type_id: self.event_type_id,
            value: self.value,
            start_date: self.start_date,
        }
    }
}

/// Fixed-capacity page of one member's attended events
///
/// Invariants: at most MAX_PAGE_SIZE entries per page; across all of a
/// member's pages, at most one entry per event.
#[derive(Debug, Clone)]
pub struct AttendanceBucket {
    pub id: Uuid,
    pub troupe_id: Uuid,
    pub member_id: Uuid,
    pub page: i64,
    pub events: BTreeMap<Uuid, BucketEntry>,
}

impl AttendanceBucket {
    pub fn new(troupe_id: Uuid, member_id: Uuid, page: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            troupe_id,
            member_id,
            page,
            events: BTreeMap::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= MAX_PAGE_SIZE
    }
}
