//! Event types for the Rollcall event system
//!
//! **[RCL-EVT-010]** Provides shared event definitions and the EventBus used
//! by the sync engine to report progress. Subscribers are the status API and
//! integration tests; events are lossy by design (a sync never blocks on a
//! slow subscriber).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Sync phase identifiers, mirrored by the orchestrator's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncPhase {
    Locked,
    Discovering,
    Ingesting,
    Reconciling,
    Persisting,
    Unlocked,
}

/// Rollcall event types
///
/// Events are broadcast via the EventBus. All variants carry a timestamp so
/// subscribers can order them without relying on delivery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RollcallEvent {
    /// A troupe sync run started (lock acquired)
    SyncStarted {
        troupe_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// The orchestrator moved to a new phase
    SyncPhaseChanged {
        troupe_id: Uuid,
        old_phase: SyncPhase,
        new_phase: SyncPhase,
        timestamp: DateTime<Utc>,
    },

    /// One event's external source failed and the event was flagged for deletion
    EventSourceFailed {
        troupe_id: Uuid,
        event_id: Uuid,
        source_uri: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A troupe sync run completed and its transaction committed
    SyncCompleted {
        troupe_id: Uuid,
        events_processed: usize,
        members_updated: usize,
        timestamp: DateTime<Utc>,
    },

    /// A troupe sync run failed; data was left untouched and the lock released
    SyncFailed {
        troupe_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The stale-lock sweep force-cleared an abandoned sync lock
    StaleLockCleared {
        troupe_id: Uuid,
        held_for_seconds: i64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast event bus shared across the sync engine
///
/// Uses tokio::broadcast internally: multiple producers, multiple consumers,
/// bounded buffer with oldest-event eviction.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RollcallEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RollcallEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscribers case
    ///
    /// Progress events are advisory; a sync run must not fail because nobody
    /// is listening.
    pub fn emit_lossy(&self, event: RollcallEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("No subscribers for event: {:?}", e.0);
        }
    }

    /// Buffer capacity this bus was created with
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current subscriber count
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let troupe_id = Uuid::new_v4();
        bus.emit_lossy(RollcallEvent::SyncStarted {
            troupe_id,
            timestamp: Utc::now(),
        });

        match rx.recv().await.expect("event expected") {
            RollcallEvent::SyncStarted { troupe_id: id, .. } => assert_eq!(id, troupe_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit_lossy(RollcallEvent::SyncFailed {
            troupe_id: Uuid::new_v4(),
            reason: "source offline".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
