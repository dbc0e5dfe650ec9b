//! Attendance bucket writer
//!
//! **[RCS-BKT-010]** Attended-event entries append into fixed-capacity pages
//! (MAX_PAGE_SIZE entries each); a full page opens the next page number.
//! Deleting an event unsets its entry in place — pages are never compacted.

use crate::models::{AttendanceBucket, AttendedEvent};
use uuid::Uuid;

/// Append new attended events to a member's bucket pages
///
/// Entries already present anywhere in the member's pages are skipped (a
/// member attends an event at most once). Returns the ids of pages that
/// changed or were created.
pub fn append_entries(
    buckets: &mut Vec<AttendanceBucket>,
    troupe_id: Uuid,
    member_id: Uuid,
    new_entries: &[AttendedEvent],
) -> Vec<Uuid> {
    buckets.sort_by_key(|b| b.page);
    let mut dirty = Vec::new();

    for entry in new_entries {
        if buckets.iter().any(|b| b.events.contains_key(&entry.event_id)) {
            continue;
        }

        let target = match buckets.last_mut() {
            Some(last) if !last.is_full() => last,
            _ => {
                let page = buckets.last().map(|b| b.page + 1).unwrap_or(0);
                buckets.push(AttendanceBucket::new(troupe_id, member_id, page));
                buckets.last_mut().expect("bucket just pushed")
            }
        };

        target.events.insert(entry.event_id, entry.entry());
        if !dirty.contains(&target.id) {
            dirty.push(target.id);
        }
    }

    dirty
}

/// Remove one event's entry from whichever page holds it
///
/// Returns the changed page's id and the removed entry, if any.
pub fn unset_event(
    buckets: &mut [AttendanceBucket],
    event_id: Uuid,
) -> Option<(Uuid, crate::models::BucketEntry)> {
    for bucket in buckets.iter_mut() {
        if let Some(entry) = bucket.events.remove(&event_id) {
            return Some((bucket.id, entry));
        }
    }
    None
}
