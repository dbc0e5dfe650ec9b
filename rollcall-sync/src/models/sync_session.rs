//! Sync run state machine
//!
//! **[RCS-WF-010]** A sync run progresses through the states:
//! IDLE → LOCKED → DISCOVERING → INGESTING → RECONCILING → PERSISTING → UNLOCKED
//! with an error edge from any state back to UNLOCKED (lock released, data
//! untouched). Partial progress in INGESTING/RECONCILING lives only in memory.

use chrono::{DateTime, Utc};
use rollcall_common::events::SyncPhase;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sync run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncState {
    Idle,
    /// Troupe sync-lock flag set
    Locked,
    /// Folder sources enumerated, events created/flagged
    Discovering,
    /// Per-event adapters pulling audience data
    Ingesting,
    /// Candidate merge and point recomputation (in memory)
    Reconciling,
    /// Single transactional write-back
    Persisting,
    /// Terminal: lock released after commit
    Unlocked,
    /// Terminal: lock released after failure, data untouched
    Failed,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Unlocked | SyncState::Failed)
    }

    /// Event-bus phase for this state, None for Idle/Failed
    pub fn phase(&self) -> Option<SyncPhase> {
        match self {
            SyncState::Idle | SyncState::Failed => None,
            SyncState::Locked => Some(SyncPhase::Locked),
            SyncState::Discovering => Some(SyncPhase::Discovering),
            SyncState::Ingesting => Some(SyncPhase::Ingesting),
            SyncState::Reconciling => Some(SyncPhase::Reconciling),
            SyncState::Persisting => Some(SyncPhase::Persisting),
            SyncState::Unlocked => Some(SyncPhase::Unlocked),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "IDLE",
            SyncState::Locked => "LOCKED",
            SyncState::Discovering => "DISCOVERING",
            SyncState::Ingesting => "INGESTING",
            SyncState::Reconciling => "RECONCILING",
            SyncState::Persisting => "PERSISTING",
            SyncState::Unlocked => "UNLOCKED",
            SyncState::Failed => "FAILED",
        }
    }
}

/// One absorbed per-event failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncIssue {
    pub event_id: Option<Uuid>,
    pub source_uri: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// In-memory state of one sync run, snapshotted to the database for diagnostics
#[derive(Debug, Clone)]
pub struct SyncSession {
    pub troupe_id: Uuid,
    pub state: SyncState,
    pub events_total: usize,
    pub events_processed: usize,
    pub members_seen: usize,
    pub issues: Vec<SyncIssue>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SyncSession {
    pub fn new(troupe_id: Uuid) -> Self {
        Self {
            troupe_id,
            state: SyncState::Idle,
            events_total: 0,
            events_processed: 0,
            members_seen: 0,
            issues: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to a new state, stamping the end time on terminal states
    pub fn transition_to(&mut self, new_state: SyncState) -> SyncState {
        let old_state = self.state;
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        old_state
    }

    pub fn add_issue(&mut self, event_id: Option<Uuid>, source_uri: &str, message: String) {
        self.issues.push(SyncIssue {
            event_id,
            source_uri: source_uri.to_string(),
            message,
            occurred_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_stamp_end_time() {
        let mut session = SyncSession::new(Uuid::new_v4());
        assert!(session.ended_at.is_none());

        session.transition_to(SyncState::Locked);
        assert!(session.ended_at.is_none());

        session.transition_to(SyncState::Failed);
        assert!(session.ended_at.is_some());
        assert!(session.state.is_terminal());
    }

    #[test]
    fn test_failed_has_no_phase() {
        assert!(SyncState::Failed.phase().is_none());
        assert!(SyncState::Idle.phase().is_none());
        assert!(SyncState::Ingesting.phase().is_some());
    }
}
