//! Background loops of the sync worker
//!
//! Three interval tasks run for the life of the process: the sync queue
//! consumer, the stale-lock sweep, and the quota refresh. All honor the
//! shared cancellation token for graceful shutdown.

use crate::db::{queue, troupes};
use crate::error::SyncError;
use crate::services::{QuotaService, SyncOrchestrator};
use chrono::Utc;
use rollcall_common::events::{EventBus, RollcallEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Consume the sync queue: one orchestrator run per dequeued request
///
/// Delivery is at-least-once. A request whose troupe is currently locked is
/// released back to the queue for a later poll; all other outcomes complete
/// the request (the sync either ran or failed for a reason a retry at the
/// transport layer will not fix).
pub async fn run_queue_consumer(
    db: SqlitePool,
    orchestrator: Arc<SyncOrchestrator>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("Sync queue consumer started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }

        loop {
            let request = match queue::claim_next(&db).await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Queue poll failed: {}", e);
                    break;
                }
            };

            tracing::info!(troupe_id = %request.troupe_id, "Processing sync request");
            match orchestrator.sync(request.troupe_id).await {
                Ok(report) => {
                    tracing::info!(
                        troupe_id = %request.troupe_id,
                        events = report.events_processed,
                        members = report.members_updated,
                        "Sync completed"
                    );
                    finish(&db, request.id, true).await;
                }
                Err(SyncError::SyncInProgress(_)) => {
                    // Another worker holds the lock; try again next poll
                    finish(&db, request.id, false).await;
                }
                Err(e) => {
                    tracing::error!(troupe_id = %request.troupe_id, "Sync failed: {}", e);
                    finish(&db, request.id, true).await;
                }
            }

            if cancel.is_cancelled() {
                break;
            }
        }
    }

    tracing::info!("Sync queue consumer stopped");
}

async fn finish(db: &SqlitePool, request_id: i64, done: bool) {
    let result = if done {
        queue::complete(db, request_id).await
    } else {
        queue::release(db, request_id).await
    };
    if let Err(e) = result {
        tracing::error!(request_id, "Queue bookkeeping failed: {}", e);
    }
}

/// Force-clear sync locks held past the maximum sync duration
pub async fn run_stale_lock_sweep(
    db: SqlitePool,
    event_bus: EventBus,
    sweep_interval: Duration,
    max_sync_duration_secs: i64,
    cancel: CancellationToken,
) {
    tracing::info!(
        max_secs = max_sync_duration_secs,
        "Stale-lock sweep started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(sweep_interval) => {}
        }

        match troupes::clear_stale_locks(&db, max_sync_duration_secs).await {
            Ok(cleared) => {
                for (troupe_id, held_for_seconds) in cleared {
                    tracing::warn!(
                        troupe_id = %troupe_id,
                        held_for_seconds,
                        "Force-cleared abandoned sync lock"
                    );
                    event_bus.emit_lossy(RollcallEvent::StaleLockCleared {
                        troupe_id,
                        held_for_seconds,
                        timestamp: Utc::now(),
                    });
                }
            }
            Err(e) => tracing::error!("Stale-lock sweep failed: {}", e),
        }
    }

    tracing::info!("Stale-lock sweep stopped");
}

/// Restore quota counters to their baselines on a schedule
pub async fn run_quota_refresh(
    db: SqlitePool,
    quota: QuotaService,
    refresh_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("Quota refresh started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(refresh_interval) => {}
        }

        match troupes::all_troupe_ids(&db).await {
            Ok(troupe_ids) => {
                if let Err(e) = quota.refresh_all(&troupe_ids).await {
                    tracing::error!("Quota refresh failed: {}", e);
                }
            }
            Err(e) => tracing::error!("Quota refresh could not list troupes: {}", e),
        }
    }

    tracing::info!("Quota refresh stopped");
}
