//! DISCOVERING phase
//!
//! For each event type, list its folder sources and reconcile the troupe's
//! event set against what the folders contain: unseen items become new events
//! (held in memory until PERSISTING), items that vanished mark their event
//! for deletion. A folder that fails to list suppresses deletion marking for
//! its event type — absence cannot be distinguished from outage.

use super::{DiscoveryOutcome, SyncOrchestrator};
use crate::db::events;
use crate::db::limits::QuotaDeltas;
use crate::error::SyncResult;
use crate::models::{Event, EventSourceKind, SyncSession, Troupe};
use crate::services::quota::QuotaScope;
use crate::services::sources::FolderEntry;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

impl SyncOrchestrator {
    pub(super) async fn phase_discovery(
        &self,
        troupe: &Troupe,
        session: &mut SyncSession,
        scope: &QuotaScope,
    ) -> SyncResult<DiscoveryOutcome> {
        let event_types = events::load_event_types(&self.db, troupe.id).await?;
        let mut all_events = events::load_events(&self.db, troupe.id).await?;

        let mut known_uris: HashSet<String> =
            all_events.iter().map(|e| e.source_uri.clone()).collect();

        let mut deleted: Vec<Uuid> = Vec::new();
        let mut discovered: Vec<(Uuid, f64, FolderEntry)> = Vec::new();

        for event_type in &event_types {
            let mut listed: BTreeMap<String, FolderEntry> = BTreeMap::new();
            let mut every_folder_listed = true;

            for folder_uri in &event_type.source_folder_uris {
                match self.gateway.list_folder(folder_uri).await {
                    Ok(entries) => {
                        for entry in entries {
                            listed.insert(entry.uri.clone(), entry);
                        }
                    }
                    Err(e) => {
                        every_folder_listed = false;
                        tracing::warn!(
                            troupe_id = %troupe.id,
                            folder = %folder_uri,
                            "Folder listing failed: {}",
                            e
                        );
                        session.add_issue(None, folder_uri, e.to_string());
                    }
                }
            }

            for entry in listed.values() {
                if entry.kind == EventSourceKind::Unset {
                    continue;
                }
                // Claiming the uri here also dedupes across event types
                // sharing a folder
                if known_uris.insert(entry.uri.clone()) {
                    discovered.push((event_type.id, event_type.value, entry.clone()));
                }
            }

            // Deletion marks only when the type's folders all answered
            if every_folder_listed {
                for event in all_events
                    .iter()
                    .filter(|e| e.event_type_id == Some(event_type.id))
                {
                    if !listed.contains_key(&event.source_uri) {
                        deleted.push(event.id);
                    }
                }
            }
        }

        // Bulk event creation: one pre-check, per-item charges deferred to
        // the scope, one aggregated settle after PERSISTING.
        if !discovered.is_empty() {
            let bulk = QuotaDeltas {
                events: -(discovered.len() as i64),
                ..Default::default()
            };
            self.quota.require_within_limits(troupe.id, &bulk).await?;
        }

        for (event_type_id, value, entry) in discovered {
            tracing::info!(
                troupe_id = %troupe.id,
                uri = %entry.uri,
                "Discovered new event source"
            );
            all_events.push(Event {
                id: Uuid::new_v4(),
                troupe_id: troupe.id,
                title: entry.title,
                start_date: entry.created_at,
                source: entry.kind,
                source_uri: entry.uri,
                event_type_id: Some(event_type_id),
                value,
                field_map: BTreeMap::new(),
            });
            scope.record(QuotaDeltas {
                events: -1,
                ..Default::default()
            });
        }

        Ok(DiscoveryOutcome {
            events: all_events,
            deleted,
        })
    }
}
