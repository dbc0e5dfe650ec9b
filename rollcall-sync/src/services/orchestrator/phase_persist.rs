//! PERSISTING phase
//!
//! One transaction per troupe: event field maps and new events, member
//! upserts, bucket pages, deletion of flagged events, the troupe's
//! `last_updated` stamp, and the lock clear — commit or nothing. Quota
//! settlement and the log sheet write follow the commit; the former failing
//! is an integrity error, the latter is logged and swallowed.

use super::{PersistPlan, SyncOrchestrator, SyncReport};
use crate::db::{buckets, events, members, troupes};
use crate::error::SyncResult;
use crate::models::{SyncSession, Troupe};
use crate::services::quota::QuotaScope;

impl SyncOrchestrator {
    pub(super) async fn phase_persist(
        &self,
        troupe: &Troupe,
        plan: PersistPlan,
        session: &mut SyncSession,
        scope: &QuotaScope,
    ) -> SyncResult<SyncReport> {
        let mut tx = self.db.begin().await?;

        for event in &plan.events_to_save {
            events::save_event(&mut tx, event).await?;
        }
        for event_id in &plan.events_to_delete {
            events::delete_event(&mut tx, *event_id).await?;
        }
        for member in &plan.members_to_save {
            members::save_member(&mut tx, member).await?;
        }
        for bucket in &plan.buckets_to_save {
            buckets::save_bucket(&mut tx, bucket).await?;
        }
        if plan.properties_expanded {
            troupes::update_member_properties(&mut tx, troupe).await?;
        }
        troupes::touch_last_updated(&mut tx, troupe.id).await?;
        troupes::release_sync_lock_in(&mut tx, troupe.id).await?;

        tx.commit().await?;

        tracing::info!(
            troupe_id = %troupe.id,
            events = plan.events_to_save.len(),
            deleted = plan.events_to_delete.len(),
            members = plan.members_to_save.len(),
            buckets = plan.buckets_to_save.len(),
            "Sync persisted"
        );

        // Post-mutation accounting for the whole bulk run
        self.quota.settle(troupe.id, scope).await?;

        // Log sheet failures do not roll back the sync
        if let Some(log_sheet) = &self.log_sheet {
            if let Err(e) = log_sheet
                .update_log(troupe.id, &plan.events_to_save, &plan.members_to_save)
                .await
            {
                tracing::warn!(troupe_id = %troupe.id, "Log sheet update failed: {}", e);
            }
        }

        Ok(SyncReport {
            troupe_id: troupe.id,
            events_processed: session.events_processed,
            events_deleted: plan.events_to_delete.len(),
            members_updated: plan.members_to_save.len(),
            issues: session.issues.clone(),
        })
    }
}
