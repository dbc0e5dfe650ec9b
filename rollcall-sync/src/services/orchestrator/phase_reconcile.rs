//! RECONCILING phase
//!
//! Pure in-memory reconciliation: merged candidates land on persisted or
//! freshly created members, attendance entries append into bucket pages, and
//! point totals move incrementally — new credits add in, deleted events
//! withdraw. Nothing touches the database until PERSISTING.

use super::phase_ingest::IngestOutcome;
use super::{PersistPlan, SyncOrchestrator};
use crate::db::limits::QuotaDeltas;
use crate::db::{buckets, members};
use crate::error::SyncResult;
use crate::models::{AttendanceBucket, AttendedEvent, Member, SyncSession, Troupe};
use crate::services::quota::QuotaScope;
use crate::services::{bucket_writer, identity_resolver, points};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

impl SyncOrchestrator {
    pub(super) async fn phase_reconcile(
        &self,
        troupe: &Troupe,
        ingest: IngestOutcome,
        _session: &mut SyncSession,
        scope: &QuotaScope,
    ) -> SyncResult<PersistPlan> {
        let IngestOutcome {
            events,
            deleted,
            attendees,
        } = ingest;

        let mut member_index: HashMap<Uuid, Member> = HashMap::new();
        let mut by_id_value: HashMap<String, Uuid> = HashMap::new();
        for member in members::load_members(&self.db, troupe.id).await? {
            if let Some(id_value) = member.identifying_value() {
                by_id_value.insert(id_value, member.id);
            }
            member_index.insert(member.id, member);
        }

        let mut bucket_cache: HashMap<Uuid, Vec<AttendanceBucket>> = HashMap::new();
        let mut dirty_members: HashSet<Uuid> = HashSet::new();
        let mut dirty_buckets: HashSet<Uuid> = HashSet::new();

        // Withdraw deleted events from their attendees
        for event_id in &deleted {
            let attending = members::members_attending(&self.db, troupe.id, *event_id).await?;
            for attending_member in attending {
                let member_id = attending_member.id;
                let member = member_index.entry(member_id).or_insert(attending_member);

                let pages = match bucket_cache.entry(member_id) {
                    std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(buckets::load_for_member(&self.db, member_id).await?)
                    }
                };

                if let Some((page_id, entry)) = bucket_writer::unset_event(pages, *event_id) {
                    points::credit(
                        &mut member.points,
                        &troupe.point_types,
                        entry.start_date,
                        -entry.value,
                    );
                    dirty_buckets.insert(page_id);
                    dirty_members.insert(member_id);
                }
            }
        }

        // Land candidates on members
        let deleted_set: HashSet<Uuid> = deleted.iter().copied().collect();
        for candidate in attendees.into_candidates() {
            let member_id = match by_id_value.get(&candidate.id_value) {
                Some(id) => *id,
                None => {
                    let member = identity_resolver::new_member_from(troupe.id, &candidate);
                    let id = member.id;
                    by_id_value.insert(candidate.id_value.clone(), id);
                    member_index.insert(id, member);
                    scope.record(QuotaDeltas {
                        members: -1,
                        ..Default::default()
                    });
                    dirty_members.insert(id);
                    id
                }
            };

            let member = member_index
                .get_mut(&member_id)
                .expect("member indexed above");

            if identity_resolver::apply_candidate(member, &candidate, troupe.origin_event_id) {
                dirty_members.insert(member_id);
            }

            let pages = match bucket_cache.entry(member_id) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(buckets::load_for_member(&self.db, member_id).await?)
                }
            };

            let new_entries: Vec<AttendedEvent> = candidate
                .attended
                .iter()
                .filter(|a| !deleted_set.contains(&a.event_id))
                .filter(|a| !pages.iter().any(|p| p.events.contains_key(&a.event_id)))
                .cloned()
                .collect();

            if new_entries.is_empty() {
                continue;
            }

            for page_id in
                bucket_writer::append_entries(pages, troupe.id, member_id, &new_entries)
            {
                dirty_buckets.insert(page_id);
            }
            for entry in &new_entries {
                points::credit(
                    &mut member.points,
                    &troupe.point_types,
                    entry.start_date,
                    entry.value,
                );
            }
            dirty_members.insert(member_id);
        }

        let mut plan = PersistPlan {
            events_to_delete: deleted,
            ..Default::default()
        };
        plan.events_to_save = events
            .into_iter()
            .filter(|e| !plan.events_to_delete.contains(&e.id))
            .collect();
        plan.members_to_save = member_index
            .into_values()
            .filter(|m| dirty_members.contains(&m.id))
            .collect();
        plan.members_to_save.sort_by_key(|m| m.id);
        plan.buckets_to_save = bucket_cache
            .into_values()
            .flatten()
            .filter(|b| dirty_buckets.contains(&b.id))
            .collect();
        plan.buckets_to_save.sort_by_key(|b| (b.member_id, b.page));

        Ok(plan)
    }
}
