//! Spreadsheet source adapter
//!
//! **[RCS-SRC-020]** Fetches a delimited export of the source; row 1 carries
//! field labels, subsequent rows carry data. A column invalidated mid-scan
//! still contributes its already-accepted earlier rows: coercion failures
//! null the mapping going forward, never retroactively.

use super::{
    resolve_source_uri, sync_field_map, EventAudience, EventDataSource, SourceError, SourceField,
    SourceGateway,
};
use crate::models::{
    AttendedEvent, Event, EventSourceKind, PropertyType, Troupe, MEMBER_ID_PROPERTY,
};
use crate::services::coercion::{self, BooleanPair};
use crate::services::identity_resolver::{CandidateMember, CandidateProperty};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

pub struct SpreadsheetSource {
    gateway: Arc<dyn SourceGateway>,
}

impl SpreadsheetSource {
    pub fn new(gateway: Arc<dyn SourceGateway>) -> Self {
        Self { gateway }
    }
}

fn column_field_id(index: usize) -> String {
    format!("col:{}", index)
}

fn column_index(field_id: &str) -> Option<usize> {
    field_id.strip_prefix("col:")?.parse().ok()
}

#[async_trait]
impl EventDataSource for SpreadsheetSource {
    async fn init(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn discover_audience(
        &self,
        event: &Event,
        troupe: &Troupe,
        _asof: DateTime<Utc>,
    ) -> Result<EventAudience, SourceError> {
        let (kind, provider_id) = resolve_source_uri(&event.source_uri).ok_or_else(|| {
            SourceError::Malformed(format!("unresolvable source uri: {}", event.source_uri))
        })?;
        if kind != EventSourceKind::Spreadsheet {
            return Err(SourceError::Malformed(format!(
                "uri is not a spreadsheet source: {}",
                event.source_uri
            )));
        }

        let table = self.gateway.fetch_table(&provider_id).await?;
        if table.headers.is_empty() {
            return Err(SourceError::Malformed("export has no header row".into()));
        }

        // Pass 1: field synchronization. Any property kind is expressible as
        // spreadsheet text (booleans via the TRUE/FALSE checkbox pair), so no
        // kind constraint applies.
        let fields: Vec<SourceField> = table
            .headers
            .iter()
            .enumerate()
            .map(|(index, label)| SourceField {
                id: column_field_id(index),
                label: label.clone(),
                legal_kinds: None,
            })
            .collect();

        let outcome = sync_field_map(event, troupe, &fields);
        let mut field_map = outcome.field_map;

        // Audience synchronization runs only with a valid identifying field
        let Some(id_field) = outcome.identifying_field else {
            tracing::debug!(
                event_id = %event.id,
                "No identifying field; skipping audience scan"
            );
            return Ok(EventAudience {
                field_map,
                candidates: Vec::new(),
            });
        };
        let id_column = column_index(&id_field)
            .ok_or_else(|| SourceError::Malformed(format!("bad field id: {}", id_field)))?;

        let id_type = troupe
            .member_properties
            .get(MEMBER_ID_PROPERTY)
            .copied()
            .unwrap_or(PropertyType::required(crate::models::PropertyKind::String));

        // Pass 2: audience synchronization
        let mut candidates = Vec::new();
        let mut dead_fields: HashSet<String> = HashSet::new();

        for row in &table.rows {
            let raw_id = row.get(id_column).map(String::as_str);
            let id_value = match coercion::coerce(raw_id, id_type, None)
                .ok()
                .and_then(|v| v.as_key())
            {
                Some(v) => v,
                None => continue, // row without a usable identity
            };

            let mut candidate = CandidateMember::new(id_value);

            for (field_id, mapping) in &field_map {
                if dead_fields.contains(field_id) {
                    continue;
                }
                let Some(property) = &mapping.property else {
                    continue;
                };
                let Some(index) = column_index(field_id) else {
                    continue;
                };
                let Some(declared) = troupe.member_properties.get(property) else {
                    continue;
                };

                let raw = row.get(index).map(String::as_str);
                match coercion::coerce(raw, *declared, Some(&BooleanPair::spreadsheet_default())) {
                    Ok(value) => {
                        candidate.properties.insert(
                            property.clone(),
                            CandidateProperty {
                                value,
                                from_event: event.id,
                            },
                        );
                    }
                    Err(e) if !mapping.overridden => {
                        // Degrade the column from this row on
                        tracing::debug!(
                            event_id = %event.id,
                            field = %field_id,
                            "Column invalidated: {}",
                            e
                        );
                        dead_fields.insert(field_id.clone());
                    }
                    Err(_) => {} // overridden mapping: skip the value, keep the mapping
                }
            }

            candidate.attended.push(AttendedEvent {
                event_id: event.id,
                event_type_id: event.event_type_id,
                value: event.value,
                start_date: event.start_date,
            });
            candidates.push(candidate);
        }

        for field_id in &dead_fields {
            if let Some(mapping) = field_map.get_mut(field_id) {
                mapping.property = None;
                mapping.matcher_priority = None;
            }
        }

        Ok(EventAudience {
            field_map,
            candidates,
        })
    }
}
