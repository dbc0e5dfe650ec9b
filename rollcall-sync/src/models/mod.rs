//! Data model for the attendance synchronization engine

mod event;
mod member;
mod sync_session;
mod troupe;

pub use event::{Event, EventSourceKind, EventType, FieldMapping};
pub use member::{
    AttendanceBucket, AttendedEvent, BucketEntry, Member, MemberProperty, PropertyValue,
    MAX_PAGE_SIZE, MEMBER_ID_PROPERTY,
};
pub use sync_session::{SyncIssue, SyncSession, SyncState};
pub use troupe::{
    FieldMatcher, MatchCondition, MatcherFilter, PointBucket, PropertyKind, PropertyType, Troupe,
};
