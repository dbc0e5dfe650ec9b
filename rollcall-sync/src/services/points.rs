//! Points calculator
//!
//! **[RCS-PTS-010]** An attended event accrues its point value into every
//! point bucket whose date range contains the event's start date. Event
//! edits apply the delta to exactly the affected buckets of recorded
//! attendees; see [`crate::services::event_edits`] for the bulk update.

use crate::models::{AttendedEvent, PointBucket};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Recompute a member's bucket totals from their attended events
pub fn compute_points(
    point_types: &BTreeMap<String, PointBucket>,
    attended: &[AttendedEvent],
) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<String, f64> = point_types
        .keys()
        .map(|name| (name.clone(), 0.0))
        .collect();

    for event in attended {
        credit(&mut totals, point_types, event.start_date, event.value);
    }

    totals
}

/// Add `value` to every bucket containing `date`
pub fn credit(
    totals: &mut BTreeMap<String, f64>,
    point_types: &BTreeMap<String, PointBucket>,
    date: DateTime<Utc>,
    value: f64,
) {
    for (name, bucket) in point_types {
        if bucket.contains(date) {
            *totals.entry(name.clone()).or_insert(0.0) += value;
        }
    }
}

/// The before/after of an event edit, as seen by point accounting
#[derive(Debug, Clone, Copy)]
pub struct EventPointsDelta {
    pub old_value: f64,
    pub new_value: f64,
    pub old_date: DateTime<Utc>,
    pub new_date: DateTime<Utc>,
}

/// Apply an event edit to one member's totals
///
/// Removes the old value from buckets covering the old date, then credits
/// the new value into buckets covering the (possibly changed) date.
pub fn apply_delta(
    totals: &mut BTreeMap<String, f64>,
    point_types: &BTreeMap<String, PointBucket>,
    delta: EventPointsDelta,
) {
    credit(totals, point_types, delta.old_date, -delta.old_value);
    credit(totals, point_types, delta.new_date, delta.new_value);
}
