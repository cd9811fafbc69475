//! The sovereign gate.
//!
//! A compound authorizer for high-stakes operations: RBAC must grant the
//! permission AND a consensus-backed claim fact must meet the configured
//! minimum consensus score. Either failure is a permission denial, not an
//! authentication failure.

use crate::rbac::RbacEvaluator;
use cortex_storage::ReadPool;
use cortex_telemetry::auth_metrics;
use cortex_types::auth::{Permission, Role};
use cortex_types::error::AuthError;
use std::sync::Arc;

/// Default minimum consensus score a gate claim must carry.
pub const DEFAULT_MIN_CONSENSUS: f64 = 1.5;

/// The compound authorizer.
pub struct SovereignGate {
    rbac: RbacEvaluator,
    pool: Arc<ReadPool>,
    min_consensus_score: f64,
}

impl SovereignGate {
    /// A gate over the shared read pool with the default threshold.
    pub fn new(pool: Arc<ReadPool>) -> Self {
        Self::with_threshold(pool, DEFAULT_MIN_CONSENSUS)
    }

    /// Same, with an explicit threshold.
    pub fn with_threshold(pool: Arc<ReadPool>, min_consensus_score: f64) -> Self {
        SovereignGate {
            rbac: RbacEvaluator::new(),
            pool,
            min_consensus_score,
        }
    }

    /// Authorizes a high-stakes operation: the role (or explicit grants)
    /// must carry the permission, and the claim fact (active, visible to
    /// the tenant) must meet the consensus threshold.
    pub async fn authorize(
        &self,
        role: Role,
        explicit_grants: &[String],
        permission: Permission,
        claim_fact_id: i64,
        tenant_id: &str,
    ) -> Result<(), AuthError> {
        self.rbac.authorize(role, explicit_grants, permission)?;

        let tenant = tenant_id.to_string();
        let score: Option<f64> = self
            .pool
            .run(move |conn| {
                conn.query_row(
                    "SELECT consensus_score FROM facts
                     WHERE id = ?1 AND tenant_id = ?2 AND valid_until IS NULL",
                    rusqlite::params![claim_fact_id, tenant],
                    |r| r.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
            })
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        let score = score.unwrap_or(0.0);
        if score < self.min_consensus_score {
            auth_metrics().inc_gate_denials();
            return Err(AuthError::GateConsensus {
                score,
                required: self.min_consensus_score,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_storage::WriteWorker;
    use tempfile::tempdir;

    async fn fixture(score: f64) -> (tempfile::TempDir, Arc<WriteWorker>, SovereignGate) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gate.db");
        let conn = cortex_storage::open_writer(&path).unwrap();
        cortex_storage::migrations::initialize(&conn).unwrap();
        conn.execute(
            "INSERT INTO facts (tenant_id, project, content, consensus_score,
                                valid_from, created_at, updated_at)
             VALUES ('t', 'p', 'The gate claim fact, long enough.', ?1,
                     '2026-01-01', '2026-01-01', '2026-01-01')",
            [score],
        )
        .unwrap();
        drop(conn);
        let writer = Arc::new(WriteWorker::start(&path).unwrap());
        let pool = Arc::new(ReadPool::open(&path, 1, 2).unwrap());
        (dir, writer, SovereignGate::new(pool))
    }

    #[tokio::test]
    async fn verified_claim_passes() {
        let (_dir, writer, gate) = fixture(1.9).await;
        gate.authorize(Role::Admin, &[], Permission::PurgeData, 1, "t")
            .await
            .unwrap();
        writer.stop().await;
    }

    #[tokio::test]
    async fn weak_claim_is_denied() {
        let (_dir, writer, gate) = fixture(1.0).await;
        let err = gate
            .authorize(Role::Admin, &[], Permission::PurgeData, 1, "t")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::GateConsensus { .. }));
        writer.stop().await;
    }

    #[tokio::test]
    async fn missing_permission_fails_before_the_claim() {
        let (_dir, writer, gate) = fixture(1.9).await;
        let err = gate
            .authorize(Role::Viewer, &[], Permission::PurgeData, 1, "t")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied { .. }));
        writer.stop().await;
    }

    #[tokio::test]
    async fn cross_tenant_claims_do_not_count() {
        let (_dir, writer, gate) = fixture(1.9).await;
        let err = gate
            .authorize(Role::Admin, &[], Permission::PurgeData, 1, "other")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::GateConsensus { score, .. } if score == 0.0));
        writer.stop().await;
    }
}
