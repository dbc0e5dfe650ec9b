//! Sync orchestrator
//!
//! **[RCS-WF-020]** Top-level state machine sequencing one troupe's sync
//! under the advisory lock:
//!
//! IDLE → LOCKED → DISCOVERING → INGESTING → RECONCILING → PERSISTING → UNLOCKED
//!
//! Each phase is handled by a dedicated `phase_*` method:
//! - **DISCOVERING**: enumerate event-type folders, create events for new
//!   sources, mark vanished sources for deletion
//! - **INGESTING**: run source adapters per live event, concurrently up to a
//!   bound; adapter failures degrade to per-event deletion marks
//! - **RECONCILING**: merge candidates into member identities and recompute
//!   point totals, entirely in memory
//! - **PERSISTING**: one transaction per troupe; the lock clears inside the
//!   transaction on success, or in a separate step on failure
//!
//! The error edge from every phase lands back at UNLOCKED with the database
//! exactly as it was before the failed phase.

mod phase_discovery;
mod phase_ingest;
mod phase_persist;
mod phase_reconcile;

use crate::db::limits::QuotaDeltas;
use crate::db::{sessions, troupes};
use crate::error::{SyncError, SyncResult};
use crate::models::{
    AttendanceBucket, Event, Member, PropertyKind, PropertyType, SyncSession, SyncState, Troupe,
};
use crate::services::log_sheet::LogSheetClient;
use crate::services::quota::{QuotaScope, QuotaService};
use crate::services::sources::SourceGateway;
use chrono::Utc;
use rollcall_common::events::{EventBus, RollcallEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Tunables for one orchestrator instance
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Concurrent event ingestions within one sync
    pub ingest_parallelism: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            ingest_parallelism: 4,
        }
    }
}

/// What a completed sync did
///
/// `issues` aggregates the per-event failures that were absorbed into
/// deletion or skip; they never fail the sync as a whole.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub troupe_id: Uuid,
    pub events_processed: usize,
    pub events_deleted: usize,
    pub members_updated: usize,
    pub issues: Vec<crate::models::SyncIssue>,
}

/// Everything the persisting phase writes in one transaction
#[derive(Default)]
pub(crate) struct PersistPlan {
    pub events_to_save: Vec<Event>,
    pub events_to_delete: Vec<Uuid>,
    pub members_to_save: Vec<Member>,
    pub buckets_to_save: Vec<AttendanceBucket>,
    /// Schema write-back when matchers referenced unknown properties
    pub properties_expanded: bool,
}

/// Outcome of the discovering phase
pub(crate) struct DiscoveryOutcome {
    /// All live events, discovery-created ones included (not yet persisted)
    pub events: Vec<Event>,
    /// Events whose folder source vanished
    pub deleted: Vec<Uuid>,
}

pub struct SyncOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    gateway: Arc<dyn SourceGateway>,
    quota: QuotaService,
    log_sheet: Option<LogSheetClient>,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        gateway: Arc<dyn SourceGateway>,
        log_sheet: Option<LogSheetClient>,
        settings: SyncSettings,
    ) -> Self {
        let quota = QuotaService::new(db.clone());
        Self {
            db,
            event_bus,
            gateway,
            quota,
            log_sheet,
            settings,
        }
    }

    pub fn quota(&self) -> &QuotaService {
        &self.quota
    }

    /// Run one sync for one troupe
    ///
    /// Fails fast with [`SyncError::SyncInProgress`] when the lock is held
    /// and [`SyncError::TroupeNotFound`] for unknown troupes. Per-event
    /// source failures are absorbed into deletion marks, never surfaced as a
    /// whole-sync failure.
    pub async fn sync(&self, troupe_id: Uuid) -> SyncResult<SyncReport> {
        let mut troupe = troupes::load_troupe(&self.db, troupe_id)
            .await?
            .ok_or(SyncError::TroupeNotFound(troupe_id))?;

        self.quota.ensure_scopes(troupe_id).await?;
        let sync_cost = QuotaDeltas {
            manual_syncs: -1,
            modify_operations: -1,
            ..Default::default()
        };
        self.quota.require_within_limits(troupe_id, &sync_cost).await?;

        // LOCKED: conditional write, no queuing behind a running sync
        if !troupes::try_acquire_sync_lock(&self.db, troupe_id).await? {
            return Err(SyncError::SyncInProgress(troupe_id));
        }

        let mut session = SyncSession::new(troupe_id);
        self.enter_state(&mut session, SyncState::Locked).await;
        self.event_bus.emit_lossy(RollcallEvent::SyncStarted {
            troupe_id,
            timestamp: Utc::now(),
        });

        let properties_expanded = expand_matcher_properties(&mut troupe);

        match self.run_locked(&troupe, &mut session, properties_expanded).await {
            Ok(report) => {
                // Lock already cleared inside the persisting transaction
                self.enter_state(&mut session, SyncState::Unlocked).await;
                if let Err(e) = self.quota.increment(troupe_id, &sync_cost).await {
                    // Mutation committed but accounting did not: fatal, surfaced
                    tracing::error!(troupe_id = %troupe_id, "{}", e);
                    return Err(e);
                }
                self.event_bus.emit_lossy(RollcallEvent::SyncCompleted {
                    troupe_id,
                    events_processed: report.events_processed,
                    members_updated: report.members_updated,
                    timestamp: Utc::now(),
                });
                Ok(report)
            }
            Err(e) => {
                // Separate release step: the troupe is never left locked
                if let Err(release_err) = troupes::release_sync_lock(&self.db, troupe_id).await {
                    tracing::error!(
                        troupe_id = %troupe_id,
                        "Failed to release sync lock after error: {}",
                        release_err
                    );
                }
                self.enter_state(&mut session, SyncState::Failed).await;
                self.event_bus.emit_lossy(RollcallEvent::SyncFailed {
                    troupe_id,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    async fn run_locked(
        &self,
        troupe: &Troupe,
        session: &mut SyncSession,
        properties_expanded: bool,
    ) -> SyncResult<SyncReport> {
        let asof = Utc::now();
        let scope = QuotaScope::new();

        self.enter_state(session, SyncState::Discovering).await;
        let discovery = self.phase_discovery(troupe, session, &scope).await?;

        self.enter_state(session, SyncState::Ingesting).await;
        let ingest = self.phase_ingest(troupe, discovery, session, asof).await?;

        self.enter_state(session, SyncState::Reconciling).await;
        let mut plan = self.phase_reconcile(troupe, ingest, session, &scope).await?;
        plan.properties_expanded = properties_expanded;

        self.enter_state(session, SyncState::Persisting).await;
        let report = self.phase_persist(troupe, plan, session, &scope).await?;

        Ok(report)
    }

    /// Transition the session, emit the phase event, snapshot to the database
    async fn enter_state(&self, session: &mut SyncSession, new_state: SyncState) {
        let old_state = session.transition_to(new_state);

        if let (Some(old_phase), Some(new_phase)) = (old_state.phase(), new_state.phase()) {
            self.event_bus.emit_lossy(RollcallEvent::SyncPhaseChanged {
                troupe_id: session.troupe_id,
                old_phase,
                new_phase,
                timestamp: Utc::now(),
            });
        }

        // Snapshot failures cost visibility, not correctness
        if let Err(e) = sessions::save_session(&self.db, session).await {
            tracing::warn!(
                troupe_id = %session.troupe_id,
                "Failed to snapshot sync session: {}",
                e
            );
        }
    }
}

/// Auto-expand the troupe's schema for matcher targets it does not declare
///
/// A matcher pointing at an unknown property adds it as optional string, so
/// the mapping can take effect without a manual schema edit first.
fn expand_matcher_properties(troupe: &mut Troupe) -> bool {
    let mut expanded = false;
    let targets: Vec<String> = troupe
        .field_matchers
        .iter()
        .map(|m| m.target_property.clone())
        .collect();

    for target in targets {
        troupe.member_properties.entry(target).or_insert_with(|| {
            expanded = true;
            PropertyType::optional(PropertyKind::String)
        });
    }

    expanded
}
