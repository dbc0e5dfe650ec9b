//! Field matcher engine
//!
//! **[RCS-MAT-010]** Resolves a free-text field label from an external source
//! to a member property using the troupe's configured matcher list. Matchers
//! are tried in ascending priority order (stable: equal priorities keep
//! stored order); the first whose condition and filters hold wins. Fields
//! with a manual override are never touched, and a property already claimed
//! by another field of the same event is not claimed again.

use crate::models::{
    Event, EventSourceKind, FieldMapping, FieldMatcher, MatchCondition, MatcherFilter,
};

/// Event context a matcher's filters are evaluated against
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub source: EventSourceKind,
    pub event_title: &'a str,
}

impl<'a> MatchContext<'a> {
    pub fn for_event(event: &'a Event) -> Self {
        Self {
            source: event.source,
            event_title: &event.title,
        }
    }
}

fn condition_holds(matcher: &FieldMatcher, label: &str) -> bool {
    let label = label.to_lowercase();
    let expr = matcher.expression.to_lowercase();
    match matcher.condition {
        MatchCondition::Contains => label.contains(&expr),
        MatchCondition::Exact => label == expr,
    }
}

fn filters_hold(matcher: &FieldMatcher, ctx: MatchContext<'_>) -> bool {
    matcher.filters.iter().all(|filter| match filter {
        MatcherFilter::SourceKind(kind) => *kind == ctx.source,
        MatcherFilter::TitleContains(text) => ctx
            .event_title
            .to_lowercase()
            .contains(&text.to_lowercase()),
    })
}

/// Find the best-priority matcher for a field label
///
/// Returns the winning matcher, or None when no matcher applies (the field
/// stays unmapped until the next configuration change or manual edit).
pub fn resolve<'a>(
    label: &str,
    matchers: &'a [FieldMatcher],
    ctx: MatchContext<'_>,
) -> Option<&'a FieldMatcher> {
    // Stable sort on indices: equal priorities keep stored order
    let mut order: Vec<usize> = (0..matchers.len()).collect();
    order.sort_by_key(|&i| matchers[i].priority);

    order
        .into_iter()
        .map(|i| &matchers[i])
        .find(|m| condition_holds(m, label) && filters_hold(m, ctx))
}

/// Re-resolve one field's mapping in place
///
/// Skips manually overridden mappings. Refuses to claim a property already
/// mapped by a different field of the same event (`claimed` is the set of
/// properties taken so far in this field-sync pass). Returns the property
/// this field now claims, if any.
pub fn resync_mapping(
    mapping: &mut FieldMapping,
    matchers: &[FieldMatcher],
    ctx: MatchContext<'_>,
    claimed: &mut Vec<String>,
) -> Option<String> {
    if mapping.overridden {
        if let Some(property) = &mapping.property {
            claimed.push(property.clone());
        }
        return mapping.property.clone();
    }

    match resolve(&mapping.label, matchers, ctx) {
        Some(matcher) if !claimed.contains(&matcher.target_property) => {
            mapping.property = Some(matcher.target_property.clone());
            mapping.matcher_priority = Some(matcher.priority);
            claimed.push(matcher.target_property.clone());
            mapping.property.clone()
        }
        _ => {
            mapping.property = None;
            mapping.matcher_priority = None;
            None
        }
    }
}
