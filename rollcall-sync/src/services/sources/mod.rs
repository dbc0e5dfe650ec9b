//! Event data source adapters
//!
//! **[RCS-SRC-010]** One adapter per external source kind. Each adapter turns
//! one event's raw external payload into an updated field→property map plus a
//! set of candidate member records. Dispatch is by the event's stored source
//! kind, never by inspecting the payload's shape.
//!
//! Failure policy: an unreachable or malformed source flags that one event
//! for deletion; the rest of the sync continues.

mod form;
mod gateway;
mod spreadsheet;

pub use form::FormSource;
pub use gateway::{HttpSourceGateway, RateLimiter};
pub use spreadsheet::SpreadsheetSource;

use crate::models::{
    Event, EventSourceKind, FieldMapping, PropertyKind, Troupe, MEMBER_ID_PROPERTY,
};
use crate::services::coercion::BooleanPair;
use crate::services::field_matcher::{self, MatchContext};
use crate::services::identity_resolver::CandidateMember;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure scoped to a single event's source
///
/// Converted at the adapter boundary into an event-deletion marker; never
/// propagated as a whole-sync failure.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Network failure or timeout; retried with backoff before surfacing
    #[error("source unreachable: {0}")]
    Unreachable(String),

    /// The source answered with data the adapter cannot interpret; not retried
    #[error("source malformed: {0}")]
    Malformed(String),
}

/// Delimited export of a spreadsheet source: row 1 labels, then data rows
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Kind of a form question, constraining which property types it may map to
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QuestionKind {
    Text,
    Paragraph,
    Choice { options: Vec<String> },
    Scale { min: i64, max: i64 },
    Date,
    Time,
}

impl QuestionKind {
    /// Property kinds this question kind may legally map to
    ///
    /// Boolean mappings are only legal from exactly-two-option choice or
    /// two-point scale questions (those declare the true/false value pair).
    pub fn permits(&self, kind: PropertyKind) -> bool {
        match self {
            QuestionKind::Text => true,
            QuestionKind::Paragraph => kind == PropertyKind::String,
            QuestionKind::Choice { options } => match kind {
                PropertyKind::String => true,
                PropertyKind::Boolean => options.len() == 2,
                PropertyKind::Number | PropertyKind::Date => false,
            },
            QuestionKind::Scale { min, max } => match kind {
                PropertyKind::Number => true,
                PropertyKind::Boolean => max - min == 1,
                PropertyKind::String | PropertyKind::Date => false,
            },
            QuestionKind::Date => matches!(kind, PropertyKind::Date | PropertyKind::String),
            QuestionKind::Time => kind == PropertyKind::String,
        }
    }

    /// The declared true/false pair, when this question can express one
    pub fn boolean_pair(&self) -> Option<BooleanPair> {
        match self {
            QuestionKind::Choice { options } if options.len() == 2 => {
                Some(BooleanPair::new(options[0].clone(), options[1].clone()))
            }
            QuestionKind::Scale { min, max } if max - min == 1 => {
                Some(BooleanPair::new(max.to_string(), min.to_string()))
            }
            _ => None,
        }
    }
}

/// One question of a form source's live schema
#[derive(Debug, Clone, Deserialize)]
pub struct Question {
    pub id: String,
    pub title: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// One submitted response of a form source
#[derive(Debug, Clone, Deserialize)]
pub struct FormResponse {
    /// Question id → raw answer text
    pub answers: BTreeMap<String, String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// One item discovered under an event type's folder URI
#[derive(Debug, Clone, Deserialize)]
pub struct FolderEntry {
    pub uri: String,
    pub title: String,
    pub kind: EventSourceKind,
    pub created_at: DateTime<Utc>,
}

/// Read-only reach into the external providers
///
/// The HTTP implementation lives in [`gateway`]; tests substitute an
/// in-memory fake. Every method is one bounded network call.
#[async_trait]
pub trait SourceGateway: Send + Sync {
    async fn fetch_table(&self, provider_id: &str) -> Result<RawTable, SourceError>;
    async fn fetch_form_schema(&self, provider_id: &str) -> Result<Vec<Question>, SourceError>;
    async fn fetch_form_responses(
        &self,
        provider_id: &str,
    ) -> Result<Vec<FormResponse>, SourceError>;
    async fn list_folder(&self, folder_uri: &str) -> Result<Vec<FolderEntry>, SourceError>;
}

/// Resolve a source URI to its kind and provider-specific identifier
///
/// Fixed URL-pattern match per source kind; anything else is unresolvable.
pub fn resolve_source_uri(uri: &str) -> Option<(EventSourceKind, String)> {
    let path = uri
        .strip_prefix("https://")
        .or_else(|| uri.strip_prefix("http://"))?;

    let mut segments = path.split('/');
    let host = segments.next()?;
    let rest: Vec<&str> = segments.collect();

    match host {
        "docs.google.com" => match rest.as_slice() {
            ["spreadsheets", "d", id, ..] if !id.is_empty() => {
                Some((EventSourceKind::Spreadsheet, id.to_string()))
            }
            ["forms", "d", id, ..] if !id.is_empty() => {
                Some((EventSourceKind::Form, id.to_string()))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Result of one adapter pass over one event's source
#[derive(Debug, Clone)]
pub struct EventAudience {
    /// Updated field→property map to store back on the event
    pub field_map: BTreeMap<String, FieldMapping>,
    /// Candidate member records extracted from the source
    pub candidates: Vec<CandidateMember>,
}

/// Capability set shared by all source adapters
#[async_trait]
pub trait EventDataSource: Send + Sync {
    /// Acquire any handle needed to reach the external system
    async fn init(&self) -> Result<(), SourceError>;

    /// Two-pass scan: field synchronization, then audience synchronization
    ///
    /// Audience synchronization runs only when an identifying field is
    /// present and valid; otherwise the result carries the refreshed field
    /// map and no candidates.
    async fn discover_audience(
        &self,
        event: &Event,
        troupe: &Troupe,
        asof: DateTime<Utc>,
    ) -> Result<EventAudience, SourceError>;
}

/// Build the adapter for an event's stored source kind
pub fn adapter_for(
    kind: EventSourceKind,
    gateway: Arc<dyn SourceGateway>,
) -> Option<Box<dyn EventDataSource>> {
    match kind {
        EventSourceKind::Spreadsheet => Some(Box::new(SpreadsheetSource::new(gateway))),
        EventSourceKind::Form => Some(Box::new(FormSource::new(gateway))),
        EventSourceKind::Unset => None,
    }
}

/// One external field as presented by a source during field synchronization
#[derive(Debug, Clone)]
pub struct SourceField {
    pub id: String,
    pub label: String,
    /// Property kinds this field may legally map to, None = unconstrained
    pub legal_kinds: Option<Vec<PropertyKind>>,
}

/// Outcome of the field synchronization pass
#[derive(Debug, Clone)]
pub struct FieldSyncOutcome {
    pub field_map: BTreeMap<String, FieldMapping>,
    /// Field id currently mapped to the identifying property, when valid
    pub identifying_field: Option<String>,
}

/// Shared field synchronization pass
///
/// For each external field, resolve or re-validate its property mapping via
/// the matcher engine; drop mappings for fields no longer present in the
/// source; enforce source-kind type legality; detect the identifying field.
pub fn sync_field_map(event: &Event, troupe: &Troupe, fields: &[SourceField]) -> FieldSyncOutcome {
    let ctx = MatchContext::for_event(event);
    let mut field_map: BTreeMap<String, FieldMapping> = BTreeMap::new();
    let mut claimed: Vec<String> = Vec::new();
    let mut identifying_field = None;

    for field in fields {
        // Carry prior state (override flags in particular) for surviving fields
        let mut mapping = event
            .field_map
            .get(&field.id)
            .cloned()
            .unwrap_or(FieldMapping {
                label: field.label.clone(),
                matcher_priority: None,
                overridden: false,
                property: None,
            });
        mapping.label = field.label.clone();

        let property =
            field_matcher::resync_mapping(&mut mapping, &troupe.field_matchers, ctx, &mut claimed);

        // A mapping whose target type the source cannot legally express is
        // degraded immediately rather than failing row by row.
        if let (Some(property), Some(legal), false) =
            (&property, &field.legal_kinds, mapping.overridden)
        {
            if let Some(declared) = troupe.member_properties.get(property) {
                if !legal.contains(&declared.kind) {
                    claimed.retain(|p| p != property);
                    mapping.property = None;
                    mapping.matcher_priority = None;
                }
            }
        }

        if mapping.property.as_deref() == Some(MEMBER_ID_PROPERTY) {
            identifying_field = Some(field.id.clone());
        }

        field_map.insert(field.id.clone(), mapping);
    }

    // Fields absent from `fields` simply do not survive: their mappings are
    // removed with them.
    FieldSyncOutcome {
        field_map,
        identifying_field,
    }
}
