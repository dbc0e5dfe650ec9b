//! Troupe aggregate: property schema, point buckets, field matchers
//!
//! **[RCS-MDL-010]** The troupe owns the typed member-property schema and the
//! configuration that drives field matching during sync.

use crate::models::EventSourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Base kind of a member property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Number,
    Boolean,
    Date,
}

/// Declared type of a member property: base kind plus optional/required modifier
///
/// Stored and displayed in the compact `"string?"` / `"number!"` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyType {
    pub kind: PropertyKind,
    pub required: bool,
}

impl PropertyType {
    pub fn optional(kind: PropertyKind) -> Self {
        Self { kind, required: false }
    }

    pub fn required(kind: PropertyKind) -> Self {
        Self { kind, required: true }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            PropertyKind::String => "string",
            PropertyKind::Number => "number",
            PropertyKind::Boolean => "boolean",
            PropertyKind::Date => "date",
        };
        let modifier = if self.required { "!" } else { "?" };
        write!(f, "{}{}", kind, modifier)
    }
}

impl FromStr for PropertyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, required) = match s.strip_suffix('!') {
            Some(base) => (base, true),
            None => match s.strip_suffix('?') {
                Some(base) => (base, false),
                None => return Err(format!("Property type missing ?/! modifier: {}", s)),
            },
        };

        let kind = match base {
            "string" => PropertyKind::String,
            "number" => PropertyKind::Number,
            "boolean" => PropertyKind::Boolean,
            "date" => PropertyKind::Date,
            other => return Err(format!("Unknown property type: {}", other)),
        };

        Ok(Self { kind, required })
    }
}

impl Serialize for PropertyType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PropertyType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Named, date-ranged point accumulator (a season or a term)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointBucket {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl PointBucket {
    /// Whether an event dated `date` accrues into this bucket
    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// How a matcher expression is compared against a field label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchCondition {
    /// Label contains the expression (case-insensitive)
    Contains,
    /// Label equals the expression (case-insensitive)
    Exact,
}

/// Additional condition the event context must satisfy for a matcher to apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherFilter {
    /// Matcher only applies to events of this source kind
    SourceKind(EventSourceKind),
    /// Matcher only applies when the event title contains this text
    TitleContains(String),
}

/// Configured rule mapping external field labels to member properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMatcher {
    pub condition: MatchCondition,
    pub expression: String,
    pub target_property: String,
    /// Lower value wins; ties resolve in stored order
    pub priority: u32,
    #[serde(default)]
    pub filters: Vec<MatcherFilter>,
}

/// The tenant whose membership and events are tracked
#[derive(Debug, Clone)]
pub struct Troupe {
    pub id: Uuid,
    pub name: String,
    /// Event whose member data takes precedence over all other events
    pub origin_event_id: Option<Uuid>,
    pub sync_lock: bool,
    pub lock_acquired_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Property name → declared type
    pub member_properties: BTreeMap<String, PropertyType>,
    /// Point bucket name → date range
    pub point_types: BTreeMap<String, PointBucket>,
    /// Ordered matcher list; stored order is the tie-break for equal priorities
    pub field_matchers: Vec<FieldMatcher>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_type_round_trip() {
        for tag in ["string?", "string!", "number?", "number!", "boolean?", "boolean!", "date?", "date!"] {
            let parsed: PropertyType = tag.parse().expect(tag);
            assert_eq!(parsed.to_string(), tag);
        }
    }

    #[test]
    fn test_property_type_rejects_unknown() {
        assert!("strings?".parse::<PropertyType>().is_err());
        assert!("string".parse::<PropertyType>().is_err());
        assert!("".parse::<PropertyType>().is_err());
    }

    #[test]
    fn test_point_bucket_contains_is_inclusive() {
        let bucket = PointBucket {
            start_date: "2026-01-01T00:00:00Z".parse().unwrap(),
            end_date: "2026-06-30T00:00:00Z".parse().unwrap(),
        };
        assert!(bucket.contains("2026-01-01T00:00:00Z".parse().unwrap()));
        assert!(bucket.contains("2026-06-30T00:00:00Z".parse().unwrap()));
        assert!(!bucket.contains("2026-07-01T00:00:00Z".parse().unwrap()));
    }
}
