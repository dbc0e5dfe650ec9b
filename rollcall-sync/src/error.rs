//! Error types for the sync engine
//!
//! **[RCS-ERR-010]** Client-visible conditions (lock conflicts, quota
//! refusals, bad input) are distinct variants so callers can tell them apart
//! from infrastructure failures. Event-scoped source failures never appear
//! here: they are absorbed at the adapter boundary into deletion markers.

use thiserror::Error;
use uuid::Uuid;

/// Result type for sync engine operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Failures of the sync engine's library surface
#[derive(Debug, Error)]
pub enum SyncError {
    /// A sync already holds the troupe's lock; no queuing, no waiting
    #[error("Sync already in progress for troupe {0}")]
    SyncInProgress(Uuid),

    /// The troupe does not exist
    #[error("Troupe not found: {0}")]
    TroupeNotFound(Uuid),

    /// Quota pre-check refused the operation; nothing was mutated
    #[error("Operation not within limits: {0}")]
    QuotaExceeded(String),

    /// Caller supplied invalid input; never retried
    #[error("Invalid request: {0}")]
    Client(String),

    /// A step that should be impossible to fail did fail (e.g. quota
    /// accounting after a successful mutation). Fatal; never auto-retried.
    #[error("Integrity failure: {0}")]
    Integrity(String),

    /// Shared infrastructure failure (database, IO, config)
    #[error(transparent)]
    Infra(#[from] rollcall_common::Error),
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Infra(rollcall_common::Error::Database(e))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Infra(rollcall_common::Error::Serde(e))
    }
}
