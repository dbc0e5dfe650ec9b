//! INGESTING phase
//!
//! Runs each live event's source adapter, concurrently up to the configured
//! bound. Adapters are independent per event: each mutates only its own
//! event's field map and absorbs candidates into the shared concurrent
//! attendee map. A failing source flags its event for deletion; the other
//! events continue unaffected.

use super::{DiscoveryOutcome, SyncOrchestrator};
use crate::error::SyncResult;
use crate::models::{EventSourceKind, SyncSession, Troupe};
use crate::services::identity_resolver::AttendeeMap;
use crate::services::sources::{adapter_for, SourceError};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rollcall_common::events::RollcallEvent;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Outcome of the ingesting phase
pub(super) struct IngestOutcome {
    /// All events, field maps refreshed where the scan ran
    pub events: Vec<crate::models::Event>,
    /// Deletion marks: vanished sources plus failed sources
    pub deleted: Vec<Uuid>,
    /// Candidate members keyed by identifying value
    pub attendees: AttendeeMap,
}

impl SyncOrchestrator {
    pub(super) async fn phase_ingest(
        &self,
        troupe: &Troupe,
        discovery: DiscoveryOutcome,
        session: &mut SyncSession,
        asof: DateTime<Utc>,
    ) -> SyncResult<IngestOutcome> {
        let DiscoveryOutcome {
            mut events,
            mut deleted,
        } = discovery;

        let attendees = AttendeeMap::new(troupe.origin_event_id);

        let scannable: Vec<crate::models::Event> = events
            .iter()
            .filter(|e| !deleted.contains(&e.id) && e.source != EventSourceKind::Unset)
            .cloned()
            .collect();
        session.events_total = scannable.len();

        let results: Vec<(Uuid, Result<BTreeMap<String, crate::models::FieldMapping>, SourceError>)> =
            stream::iter(scannable.into_iter().map(|event| {
                let gateway = self.gateway.clone();
                let attendees = &attendees;
                async move {
                    let Some(adapter) = adapter_for(event.source, gateway) else {
                        return (
                            event.id,
                            Err(SourceError::Malformed("no adapter for source kind".into())),
                        );
                    };
                    match adapter.discover_audience(&event, troupe, asof).await {
                        Ok(audience) => {
                            for candidate in audience.candidates {
                                attendees.absorb(candidate);
                            }
                            (event.id, Ok(audience.field_map))
                        }
                        Err(e) => (event.id, Err(e)),
                    }
                }
            }))
            .buffer_unordered(self.settings.ingest_parallelism.max(1))
            .collect()
            .await;

        for (event_id, result) in results {
            match result {
                Ok(field_map) => {
                    if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
                        event.field_map = field_map;
                    }
                    session.events_processed += 1;
                }
                Err(e) => {
                    let source_uri = events
                        .iter()
                        .find(|ev| ev.id == event_id)
                        .map(|ev| ev.source_uri.clone())
                        .unwrap_or_default();

                    tracing::warn!(
                        troupe_id = %troupe.id,
                        event_id = %event_id,
                        source = %source_uri,
                        "Event source failed, flagging event for deletion: {}",
                        e
                    );
                    session.add_issue(Some(event_id), &source_uri, e.to_string());
                    self.event_bus.emit_lossy(RollcallEvent::EventSourceFailed {
                        troupe_id: troupe.id,
                        event_id,
                        source_uri,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    deleted.push(event_id);
                }
            }
        }

        session.members_seen = attendees.len();

        Ok(IngestOutcome {
            events,
            deleted,
            attendees,
        })
    }
}
