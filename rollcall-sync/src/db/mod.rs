//! Database access for the sync engine
//!
//! **[RCS-DB-010]** Row-level operations over the shared Rollcall schema
//! (see `rollcall_common::db`). Loads take the pool; mutations that must be
//! part of the per-troupe persisting transaction take a `SqliteConnection`
//! so they compose under one `BEGIN`.

pub mod buckets;
pub mod events;
pub mod limits;
pub mod members;
pub mod queue;
pub mod sessions;
pub mod troupes;

use chrono::{DateTime, Utc};
use rollcall_common::{Error, Result};
use uuid::Uuid;

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(format!("bad uuid {:?}: {}", raw, e)))
}

pub(crate) fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad timestamp {:?}: {}", raw, e)))
}

pub(crate) fn parse_datetime_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_datetime(&s)).transpose()
}
