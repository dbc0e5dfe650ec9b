//! Member identity resolver
//!
//! **[RCS-IDR-010]** Merges candidate member records across events into one
//! coherent member, keyed by the identifying property value. The candidate
//! map is concurrency-safe (adapters for different events may discover the
//! same member simultaneously); merges happen read-modify-write under the
//! per-key entry lock.

use crate::models::{AttendedEvent, Member, MemberProperty, PropertyValue, MEMBER_ID_PROPERTY};
use dashmap::DashMap;
use std::collections::HashMap;
use uuid::Uuid;

/// A property value extracted by one event's adapter, with provenance
#[derive(Debug, Clone)]
pub struct CandidateProperty {
    pub value: PropertyValue,
    /// Event whose source produced this value
    pub from_event: Uuid,
}

/// A member record as extracted from one or more event sources
#[derive(Debug, Clone)]
pub struct CandidateMember {
    /// Identifying property value this candidate is keyed by
    pub id_value: String,
    pub properties: HashMap<String, CandidateProperty>,
    pub attended: Vec<AttendedEvent>,
}

impl CandidateMember {
    pub fn new(id_value: impl Into<String>) -> Self {
        Self {
            id_value: id_value.into(),
            properties: HashMap::new(),
            attended: Vec::new(),
        }
    }
}

/// Concurrency-safe candidate map for one sync pass
///
/// Keyed by identifying value; `absorb` has merge-on-insert semantics.
pub struct AttendeeMap {
    inner: DashMap<String, CandidateMember>,
    origin_event: Option<Uuid>,
}

impl AttendeeMap {
    pub fn new(origin_event: Option<Uuid>) -> Self {
        Self {
            inner: DashMap::new(),
            origin_event,
        }
    }

    /// Merge one candidate into the map under its identifying value
    pub fn absorb(&self, candidate: CandidateMember) {
        let key = candidate.id_value.clone();
        match self.inner.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                merge_candidates(occupied.get_mut(), candidate, self.origin_event);
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(candidate);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drain the map for the reconcile phase (single-threaded from here on)
    pub fn into_candidates(self) -> Vec<CandidateMember> {
        let mut candidates: Vec<CandidateMember> = self
            .inner
            .into_iter()
            .map(|(_, candidate)| candidate)
            .collect();
        // Deterministic order for persistence and tests
        candidates.sort_by(|a, b| a.id_value.cmp(&b.id_value));
        candidates
    }
}

/// Merge `incoming` into `existing` (same identifying value, same sync pass)
///
/// Non-origin values are replaced by the newer source's value; values sourced
/// from the troupe's origin event always win over other events. Attended
/// lists concatenate with per-event dedup — a member attends an event at most
/// once.
fn merge_candidates(
    existing: &mut CandidateMember,
    incoming: CandidateMember,
    origin_event: Option<Uuid>,
) {
    for (name, incoming_prop) in incoming.properties {
        match existing.properties.get(&name) {
            Some(current)
                if Some(current.from_event) == origin_event
                    && Some(incoming_prop.from_event) != origin_event =>
            {
                // Origin-event value outranks the incoming one
            }
            _ => {
                existing.properties.insert(name, incoming_prop);
            }
        }
    }

    for attended in incoming.attended {
        if !existing
            .attended
            .iter()
            .any(|a| a.event_id == attended.event_id)
        {
            existing.attended.push(attended);
        }
    }
}

/// Apply a merged candidate onto a persisted member
///
/// Manually overridden properties are never replaced by any event. Values
/// sourced from the origin event are written with the override flag set, so
/// later ordinary syncs leave them alone. Returns true when the member
/// changed.
pub fn apply_candidate(
    member: &mut Member,
    candidate: &CandidateMember,
    origin_event: Option<Uuid>,
) -> bool {
    let mut changed = false;

    for (name, candidate_prop) in &candidate.properties {
        let from_origin = Some(candidate_prop.from_event) == origin_event;

        match member.properties.get(name) {
            Some(current) if current.overridden && !from_origin => continue,
            Some(current)
                if current.value == candidate_prop.value
                    && current.overridden == from_origin => continue,
            _ => {}
        }

        member.properties.insert(
            name.clone(),
            MemberProperty {
                value: candidate_prop.value.clone(),
                overridden: from_origin,
            },
        );
        changed = true;
    }

    changed
}

/// Start a fresh member for a candidate with no persisted counterpart
pub fn new_member_from(troupe_id: Uuid, candidate: &CandidateMember) -> Member {
    let mut member = Member {
        id: Uuid::new_v4(),
        troupe_id,
        properties: Default::default(),
        points: Default::default(),
    };
    member.properties.insert(
        MEMBER_ID_PROPERTY.to_string(),
        MemberProperty {
            value: PropertyValue::Text(candidate.id_value.clone()),
            overridden: false,
        },
    );
    member
}
