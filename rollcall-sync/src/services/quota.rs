//! Quota service
//!
//! **[RCS-QTA-020]** Every externally visible mutation is gated by a
//! side-effect-free `within_limits` pre-check and accounted for by an atomic
//! `increment` only after the mutation succeeds. Bulk operations carry an
//! explicit [`QuotaScope`] that defers per-item accounting and settles one
//! aggregated update at the end, keeping quota traffic O(1) per bulk call.

use crate::db::limits::{self, QuotaDeltas, TroupeLimits, GLOBAL_SCOPE};
use crate::error::{SyncError, SyncResult};
use sqlx::SqlitePool;
use std::sync::Mutex;
use uuid::Uuid;

/// Default per-troupe counter baseline applied on refresh
pub const TROUPE_BASELINE: TroupeLimits = TroupeLimits {
    modify_operations_left: 30,
    manual_syncs_left: 10,
    events_left: 100,
    event_types_left: 10,
    members_left: 500,
    source_uris_left: 20,
};

/// Default global counter baseline applied on refresh
pub const GLOBAL_BASELINE: TroupeLimits = TroupeLimits {
    modify_operations_left: 1000,
    manual_syncs_left: 200,
    events_left: 5000,
    event_types_left: 500,
    members_left: 20000,
    source_uris_left: 1000,
};

/// Accounting context for one bulk operation
///
/// Per-item charges recorded against the scope accumulate in memory; nothing
/// reaches the counters until [`QuotaService::settle`] applies the aggregate.
pub struct QuotaScope {
    accumulated: Mutex<QuotaDeltas>,
}

impl QuotaScope {
    pub fn new() -> Self {
        Self {
            accumulated: Mutex::new(QuotaDeltas::default()),
        }
    }

    /// Record one item's consumption
    pub fn record(&self, deltas: QuotaDeltas) {
        self.accumulated
            .lock()
            .expect("quota scope lock poisoned")
            .merge(&deltas);
    }

    fn take(&self) -> QuotaDeltas {
        std::mem::take(&mut *self.accumulated.lock().expect("quota scope lock poisoned"))
    }
}

impl Default for QuotaScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Gate and account for mutations against per-troupe and global counters
#[derive(Clone)]
pub struct QuotaService {
    pool: SqlitePool,
}

impl QuotaService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Side-effect-free pre-check against both the troupe and global scopes
    pub async fn within_limits(&self, troupe_id: Uuid, deltas: &QuotaDeltas) -> SyncResult<bool> {
        let troupe_ok =
            limits::would_stay_within(&self.pool, &troupe_id.to_string(), deltas).await?;
        let global_ok = limits::would_stay_within(&self.pool, GLOBAL_SCOPE, deltas).await?;
        Ok(troupe_ok && global_ok)
    }

    /// Pre-check that raises the client-visible quota error on refusal
    pub async fn require_within_limits(
        &self,
        troupe_id: Uuid,
        deltas: &QuotaDeltas,
    ) -> SyncResult<()> {
        if self.within_limits(troupe_id, deltas).await? {
            Ok(())
        } else {
            Err(SyncError::QuotaExceeded(format!(
                "troupe {} has insufficient remaining operations",
                troupe_id
            )))
        }
    }

    /// Post-mutation accounting: atomically apply `deltas` to both scopes
    ///
    /// Called only after the guarded mutation succeeded; a refusal here means
    /// the mutation happened but the accounting did not, which is an
    /// integrity failure, not a client error.
    pub async fn increment(&self, troupe_id: Uuid, deltas: &QuotaDeltas) -> SyncResult<()> {
        if deltas.is_zero() {
            return Ok(());
        }

        if !limits::apply_deltas(&self.pool, &troupe_id.to_string(), deltas).await? {
            return Err(SyncError::Integrity(format!(
                "quota accounting failed for troupe {} after mutation",
                troupe_id
            )));
        }
        if !limits::apply_deltas(&self.pool, GLOBAL_SCOPE, deltas).await? {
            return Err(SyncError::Integrity(
                "global quota accounting failed after mutation".to_string(),
            ));
        }

        Ok(())
    }

    /// Settle a bulk operation's accumulated consumption in one update
    pub async fn settle(&self, troupe_id: Uuid, scope: &QuotaScope) -> SyncResult<()> {
        self.increment(troupe_id, &scope.take()).await
    }

    /// Ensure counter rows exist for a troupe (and the global row)
    pub async fn ensure_scopes(&self, troupe_id: Uuid) -> SyncResult<()> {
        if limits::get_limits(&self.pool, &troupe_id.to_string())
            .await?
            .is_none()
        {
            limits::reset_limits(&self.pool, &troupe_id.to_string(), TROUPE_BASELINE).await?;
        }
        if limits::get_limits(&self.pool, GLOBAL_SCOPE).await?.is_none() {
            limits::reset_limits(&self.pool, GLOBAL_SCOPE, GLOBAL_BASELINE).await?;
        }
        Ok(())
    }

    /// Scheduled refresh: restore every known scope to its baseline
    pub async fn refresh_all(&self, troupe_ids: &[Uuid]) -> SyncResult<()> {
        for troupe_id in troupe_ids {
            limits::reset_limits(&self.pool, &troupe_id.to_string(), TROUPE_BASELINE).await?;
        }
        limits::reset_limits(&self.pool, GLOBAL_SCOPE, GLOBAL_BASELINE).await?;
        tracing::info!(troupes = troupe_ids.len(), "Quota counters refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> (QuotaService, Uuid) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        rollcall_common::db::init_tables(&pool).await.unwrap();
        let service = QuotaService::new(pool);
        let troupe_id = Uuid::new_v4();
        service.ensure_scopes(troupe_id).await.unwrap();
        (service, troupe_id)
    }

    fn one_sync() -> QuotaDeltas {
        QuotaDeltas {
            manual_syncs: -1,
            modify_operations: -1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_check_then_increment() {
        let (service, troupe_id) = service().await;

        service
            .require_within_limits(troupe_id, &one_sync())
            .await
            .unwrap();
        service.increment(troupe_id, &one_sync()).await.unwrap();
    }

    #[tokio::test]
    async fn test_precheck_has_no_side_effects() {
        let (service, troupe_id) = service().await;

        for _ in 0..50 {
            service
                .require_within_limits(troupe_id, &one_sync())
                .await
                .unwrap();
        }

        // Counters untouched by checks alone
        let limits = limits::get_limits(
            &service.pool,
            &troupe_id.to_string(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(limits.manual_syncs_left, TROUPE_BASELINE.manual_syncs_left);
    }

    #[tokio::test]
    async fn test_exhausted_quota_is_client_visible() {
        let (service, troupe_id) = service().await;

        let drain = QuotaDeltas {
            manual_syncs: -TROUPE_BASELINE.manual_syncs_left,
            ..Default::default()
        };
        service.increment(troupe_id, &drain).await.unwrap();

        let result = service.require_within_limits(troupe_id, &one_sync()).await;
        assert!(matches!(result, Err(SyncError::QuotaExceeded(_))));
    }

    #[tokio::test]
    async fn test_bulk_scope_settles_once() {
        let (service, troupe_id) = service().await;

        let scope = QuotaScope::new();
        for _ in 0..7 {
            scope.record(QuotaDeltas {
                events: -1,
                ..Default::default()
            });
        }
        service.settle(troupe_id, &scope).await.unwrap();

        let limits = limits::get_limits(&service.pool, &troupe_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(limits.events_left, TROUPE_BASELINE.events_left - 7);
    }
}
