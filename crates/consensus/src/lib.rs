#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! # CORTEX Consensus
//!
//! Reputation-weighted voting. Agents cast `{-1, 0, +1}` votes on facts;
//! a vote's weight is the agent's reputation at vote time, value `0`
//! retracts. Every vote recomputes the fact's consensus score
//! (`max(0, 1 + 0.1·Σweight)`) and flips the confidence tier at the
//! verified/disputed thresholds. A legacy unweighted path coexists and
//! feeds the same formula with weight = value.

use cortex_ledger::Ledger;
use cortex_storage::{sql_params, ReadPool, WriteWorker};
use cortex_types::consensus::{AgentIdentity, OutcomeStatus, VoteReceipt, VoteValue};
use cortex_types::error::{ConsensusError, CoreError, ValidationError};
use cortex_types::time::now_iso;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Score at or above which a fact flips to `verified`.
pub const VERIFIED_THRESHOLD: f64 = 1.5;
/// Score at or below which a fact flips to `disputed`.
pub const DISPUTED_THRESHOLD: f64 = 0.5;
/// Per-weight-unit score increment.
pub const SCORE_STEP: f64 = 0.1;

/// Reputation delta when an outcome confirms a fact the agent upvoted
/// (or refutes one it downvoted).
const REP_REWARD: f64 = 0.1;
/// Reputation delta when an outcome contradicts the agent's vote.
const REP_PENALTY: f64 = -0.2;

/// The consensus engine.
pub struct ConsensusEngine {
    writer: Arc<WriteWorker>,
    pool: Arc<ReadPool>,
    ledger: Arc<Ledger>,
}

impl ConsensusEngine {
    /// An engine over the shared writer, pool and ledger.
    pub fn new(writer: Arc<WriteWorker>, pool: Arc<ReadPool>, ledger: Arc<Ledger>) -> Self {
        ConsensusEngine {
            writer,
            pool,
            ledger,
        }
    }

    /// Registers a voting identity with starting reputation 1.0. Returns
    /// the existing id when the name is taken.
    pub async fn register_agent(
        &self,
        name: &str,
        agent_type: &str,
        public_key: Option<&str>,
    ) -> Result<i64, CoreError> {
        let existing = self
            .writer
            .query_row(
                "SELECT id FROM agents WHERE name = ?1",
                sql_params![name],
            )
            .await?;
        if let Some(id) = existing
            .and_then(|row| row.into_iter().next())
            .and_then(|c| c.as_i64())
        {
            return Ok(id);
        }
        let outcome = self
            .writer
            .execute(
                "INSERT INTO agents (name, agent_type, reputation_score, public_key, created_at)
                 VALUES (?1, ?2, 1.0, ?3, ?4)",
                sql_params![name, agent_type, public_key.map(str::to_string), now_iso()],
            )
            .await?;
        Ok(outcome.last_insert_rowid)
    }

    /// Fetches an agent by id.
    pub async fn agent(&self, agent_id: i64) -> Result<Option<AgentIdentity>, CoreError> {
        let agent = self
            .pool
            .run(move |conn| {
                conn.query_row(
                    "SELECT id, name, agent_type, reputation_score, public_key, created_at
                     FROM agents WHERE id = ?1",
                    [agent_id],
                    |r| {
                        Ok(AgentIdentity {
                            id: r.get(0)?,
                            name: r.get(1)?,
                            agent_type: r.get(2)?,
                            reputation_score: r.get(3)?,
                            public_key: r.get(4)?,
                            created_at: r.get(5)?,
                        })
                    },
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
            })
            .await?;
        Ok(agent)
    }

    /// Casts a reputation-weighted vote and recomputes the fact's score.
    ///
    /// `(fact_id, agent_id)` is unique: re-voting replaces, value `0`
    /// removes the row. The weight snapshot is the agent's reputation at
    /// vote time with the vote's sign.
    pub async fn vote(
        &self,
        fact_id: i64,
        agent_id: i64,
        value: VoteValue,
        tenant_id: &str,
    ) -> Result<VoteReceipt, CoreError> {
        let project = self.fact_project(fact_id, tenant_id).await?;
        let agent = self
            .agent(agent_id)
            .await?
            .ok_or(ValidationError::AgentNotFound(agent_id))?;

        match value {
            VoteValue::Retract => {
                self.writer
                    .execute(
                        "DELETE FROM consensus_votes_v2 WHERE fact_id = ?1 AND agent_id = ?2",
                        sql_params![fact_id, agent_id],
                    )
                    .await?;
            }
            _ => {
                let weight = f64::from(value.as_i8()) * agent.reputation_score;
                self.writer
                    .execute(
                        "INSERT INTO consensus_votes_v2
                             (fact_id, agent_id, value, vote_weight, agent_rep_at_vote, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(fact_id, agent_id) DO UPDATE SET
                             value = excluded.value,
                             vote_weight = excluded.vote_weight,
                             agent_rep_at_vote = excluded.agent_rep_at_vote,
                             created_at = excluded.created_at",
                        sql_params![
                            fact_id,
                            agent_id,
                            i64::from(value.as_i8()),
                            weight,
                            agent.reputation_score,
                            now_iso()
                        ],
                    )
                    .await?;
            }
        }

        let weight_sum = self.weight_sum(fact_id).await?;
        let receipt = self
            .apply_score(fact_id, tenant_id, &project, weight_sum, json!({
                "fact_id": fact_id,
                "agent_id": agent_id,
                "value": value.as_i8(),
                "weight_sum": weight_sum,
            }))
            .await?;
        Ok(receipt)
    }

    /// The legacy unweighted path: named agents, weight = value. Feeds the
    /// same score formula.
    pub async fn vote_v1(
        &self,
        fact_id: i64,
        agent: &str,
        value: VoteValue,
        tenant_id: &str,
    ) -> Result<VoteReceipt, CoreError> {
        let project = self.fact_project(fact_id, tenant_id).await?;
        match value {
            VoteValue::Retract => {
                self.writer
                    .execute(
                        "DELETE FROM consensus_votes WHERE fact_id = ?1 AND agent = ?2",
                        sql_params![fact_id, agent],
                    )
                    .await?;
            }
            _ => {
                self.writer
                    .execute(
                        "INSERT INTO consensus_votes (fact_id, agent, vote, timestamp)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(fact_id, agent) DO UPDATE SET
                             vote = excluded.vote, timestamp = excluded.timestamp",
                        sql_params![fact_id, agent, i64::from(value.as_i8()), now_iso()],
                    )
                    .await?;
            }
        }
        let weight_sum = self.weight_sum(fact_id).await?;
        self.apply_score(fact_id, tenant_id, &project, weight_sum, json!({
            "fact_id": fact_id,
            "agent": agent,
            "value": value.as_i8(),
            "weight_sum": weight_sum,
        }))
        .await
    }

    /// Records a pending outcome for a fact.
    pub async fn record_outcome(
        &self,
        fact_id: i64,
        detail: Option<&str>,
    ) -> Result<i64, CoreError> {
        let outcome = self
            .writer
            .execute(
                "INSERT INTO outcomes (fact_id, status, detail, created_at)
                 VALUES (?1, 'pending', ?2, ?3)",
                sql_params![fact_id, detail.map(str::to_string), now_iso()],
            )
            .await?;
        Ok(outcome.last_insert_rowid)
    }

    /// Resolves an outcome and adjusts voter reputations: agents whose
    /// vote agreed with reality gain, the rest lose. Reputation never
    /// drops below zero.
    pub async fn resolve_outcome(
        &self,
        outcome_id: i64,
        status: OutcomeStatus,
    ) -> Result<(), CoreError> {
        if status == OutcomeStatus::Pending {
            return Err(
                ConsensusError::Recompute("cannot resolve an outcome to pending".into()).into(),
            );
        }
        let row = self
            .writer
            .query_row(
                "SELECT fact_id FROM outcomes WHERE id = ?1 AND status = 'pending'",
                sql_params![outcome_id],
            )
            .await?;
        let Some(fact_id) = row
            .and_then(|r| r.into_iter().next())
            .and_then(|c| c.as_i64())
        else {
            return Err(ConsensusError::Recompute(format!(
                "outcome {outcome_id} not found or already resolved"
            ))
            .into());
        };

        self.writer
            .execute(
                "UPDATE outcomes SET status = ?1, resolved_at = ?2 WHERE id = ?3",
                sql_params![status.as_str(), now_iso(), outcome_id],
            )
            .await?;

        let votes: Vec<(i64, i64)> = self
            .pool
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT agent_id, value FROM consensus_votes_v2 WHERE fact_id = ?1",
                )?;
                let rows = stmt
                    .query_map([fact_id], |r| Ok((r.get(0)?, r.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let truth = match status {
            OutcomeStatus::Confirmed => 1i64,
            OutcomeStatus::Refuted => -1i64,
            OutcomeStatus::Pending => 0i64,
        };
        for (agent_id, value) in votes {
            let delta = if value == truth { REP_REWARD } else { REP_PENALTY };
            self.writer
                .execute(
                    "UPDATE agents SET reputation_score = MAX(0.0, reputation_score + ?1)
                     WHERE id = ?2",
                    sql_params![delta, agent_id],
                )
                .await?;
        }
        info!(outcome_id, fact_id, status = status.as_str(), "outcome resolved");
        Ok(())
    }

    // --- internals ---

    /// The fact's project, doubling as the tenant-scoped existence check.
    async fn fact_project(&self, fact_id: i64, tenant_id: &str) -> Result<String, CoreError> {
        let tenant = tenant_id.to_string();
        let project: Option<String> = self
            .pool
            .run(move |conn| {
                conn.query_row(
                    "SELECT project FROM facts WHERE id = ?1 AND tenant_id = ?2",
                    rusqlite::params![fact_id, tenant],
                    |r| r.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
            })
            .await?;
        project.ok_or_else(|| ValidationError::FactNotFound(fact_id).into())
    }

    /// Sum of weighted (v2) and legacy (v1) vote weights on a fact.
    async fn weight_sum(&self, fact_id: i64) -> Result<f64, CoreError> {
        let sum = self
            .pool
            .run(move |conn| {
                let v2: f64 = conn.query_row(
                    "SELECT COALESCE(SUM(vote_weight), 0.0) FROM consensus_votes_v2
                     WHERE fact_id = ?1",
                    [fact_id],
                    |r| r.get(0),
                )?;
                let v1: f64 = conn.query_row(
                    "SELECT COALESCE(SUM(vote), 0.0) FROM consensus_votes WHERE fact_id = ?1",
                    [fact_id],
                    |r| r.get(0),
                )?;
                Ok(v2 + v1)
            })
            .await?;
        Ok(sum)
    }

    /// Writes the recomputed score (and tier, when crossed), then appends
    /// the vote's ledger transaction.
    async fn apply_score(
        &self,
        fact_id: i64,
        _tenant_id: &str,
        project: &str,
        weight_sum: f64,
        detail: serde_json::Value,
    ) -> Result<VoteReceipt, CoreError> {
        let new_score = (1.0 + SCORE_STEP * weight_sum).max(0.0);
        let new_confidence = if new_score >= VERIFIED_THRESHOLD {
            Some("verified")
        } else if new_score <= DISPUTED_THRESHOLD {
            Some("disputed")
        } else {
            None
        };

        match new_confidence {
            Some(confidence) => {
                self.writer
                    .execute(
                        "UPDATE facts SET consensus_score = ?1, confidence = ?2, updated_at = ?3
                         WHERE id = ?4",
                        sql_params![new_score, confidence, now_iso(), fact_id],
                    )
                    .await?;
            }
            None => {
                self.writer
                    .execute(
                        "UPDATE facts SET consensus_score = ?1, updated_at = ?2 WHERE id = ?3",
                        sql_params![new_score, now_iso(), fact_id],
                    )
                    .await?;
            }
        }

        let tx_id = self
            .ledger
            .append(project, "vote", &detail)
            .await
            .map_err(CoreError::from)?;

        Ok(VoteReceipt {
            fact_id,
            new_consensus_score: new_score,
            new_confidence: new_confidence.map(str::to_string),
            tx_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_ledger::LedgerConfig;
    use tempfile::tempdir;

    async fn fixture() -> (
        tempfile::TempDir,
        Arc<WriteWorker>,
        ConsensusEngine,
        i64,
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("consensus.db");
        let conn = cortex_storage::open_writer(&path).unwrap();
        cortex_storage::migrations::initialize(&conn).unwrap();
        conn.execute(
            "INSERT INTO facts (tenant_id, project, content, valid_from, created_at, updated_at)
             VALUES ('t', 'p', 'A fact to vote on, long enough.', '2026-01-01', '2026-01-01', '2026-01-01')",
            [],
        )
        .unwrap();
        drop(conn);
        let writer = Arc::new(WriteWorker::start(&path).unwrap());
        let pool = Arc::new(ReadPool::open(&path, 1, 4).unwrap());
        let ledger = Arc::new(Ledger::new(
            Arc::clone(&writer),
            Arc::clone(&pool),
            LedgerConfig::default(),
        ));
        let engine = ConsensusEngine::new(Arc::clone(&writer), pool, ledger);
        (dir, writer, engine, 1)
    }

    async fn set_reputation(writer: &WriteWorker, agent_id: i64, rep: f64) {
        writer
            .execute(
                "UPDATE agents SET reputation_score = ?1 WHERE id = ?2",
                sql_params![rep, agent_id],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upvote_raises_score_downvote_lowers() {
        let (_dir, writer, engine, fact) = fixture().await;
        let agent = engine.register_agent("solo", "ai", None).await.unwrap();

        let up = engine.vote(fact, agent, VoteValue::Up, "t").await.unwrap();
        assert!((up.new_consensus_score - 1.1).abs() < 1e-9);

        let down = engine.vote(fact, agent, VoteValue::Down, "t").await.unwrap();
        assert!((down.new_consensus_score - 0.9).abs() < 1e-9);
        writer.stop().await;
    }

    #[tokio::test]
    async fn whale_outvotes_shrimp_and_flips_verified() {
        let (_dir, writer, engine, fact) = fixture().await;
        let whale = engine.register_agent("whale", "ai", None).await.unwrap();
        let shrimp = engine.register_agent("shrimp", "ai", None).await.unwrap();
        set_reputation(&writer, whale, 10.0).await;
        set_reputation(&writer, shrimp, 1.0).await;

        engine.vote(fact, shrimp, VoteValue::Down, "t").await.unwrap();
        let receipt = engine.vote(fact, whale, VoteValue::Up, "t").await.unwrap();

        // weight sum = +10 - 1 = 9 → score = 1.9 → verified.
        assert!((receipt.new_consensus_score - 1.9).abs() < 1e-9);
        assert_eq!(receipt.new_confidence.as_deref(), Some("verified"));

        let row = writer
            .query_row("SELECT confidence, consensus_score FROM facts WHERE id = 1", vec![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row[0].as_str(), Some("verified"));
        writer.stop().await;
    }

    #[tokio::test]
    async fn retract_removes_the_vote_row() {
        let (_dir, writer, engine, fact) = fixture().await;
        let agent = engine.register_agent("fickle", "ai", None).await.unwrap();
        engine.vote(fact, agent, VoteValue::Up, "t").await.unwrap();
        let receipt = engine
            .vote(fact, agent, VoteValue::Retract, "t")
            .await
            .unwrap();
        assert!((receipt.new_consensus_score - 1.0).abs() < 1e-9);
        let row = writer
            .query_row(
                "SELECT COUNT(*) FROM consensus_votes_v2 WHERE fact_id = ?1",
                sql_params![fact],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row[0].as_i64(), Some(0));
        writer.stop().await;
    }

    #[tokio::test]
    async fn heavy_downvotes_floor_at_zero_and_flip_disputed() {
        let (_dir, writer, engine, fact) = fixture().await;
        let critic = engine.register_agent("critic", "ai", None).await.unwrap();
        set_reputation(&writer, critic, 50.0).await;
        let receipt = engine.vote(fact, critic, VoteValue::Down, "t").await.unwrap();
        assert_eq!(receipt.new_consensus_score, 0.0);
        assert_eq!(receipt.new_confidence.as_deref(), Some("disputed"));
        writer.stop().await;
    }

    #[tokio::test]
    async fn legacy_v1_votes_feed_the_same_formula() {
        let (_dir, writer, engine, fact) = fixture().await;
        let receipt = engine
            .vote_v1(fact, "legacy-agent", VoteValue::Up, "t")
            .await
            .unwrap();
        assert!((receipt.new_consensus_score - 1.1).abs() < 1e-9);
        writer.stop().await;
    }

    #[tokio::test]
    async fn votes_are_tenant_scoped() {
        let (_dir, writer, engine, fact) = fixture().await;
        let agent = engine.register_agent("outsider", "ai", None).await.unwrap();
        let err = engine.vote(fact, agent, VoteValue::Up, "other-tenant").await;
        assert!(matches!(
            err,
            Err(CoreError::Validation(ValidationError::FactNotFound(_)))
        ));
        writer.stop().await;
    }

    #[tokio::test]
    async fn outcome_resolution_adjusts_reputation() {
        let (_dir, writer, engine, fact) = fixture().await;
        let right = engine.register_agent("right", "ai", None).await.unwrap();
        let wrong = engine.register_agent("wrong", "ai", None).await.unwrap();
        engine.vote(fact, right, VoteValue::Up, "t").await.unwrap();
        engine.vote(fact, wrong, VoteValue::Down, "t").await.unwrap();

        let outcome = engine.record_outcome(fact, Some("deployed fine")).await.unwrap();
        engine
            .resolve_outcome(outcome, OutcomeStatus::Confirmed)
            .await
            .unwrap();

        let right_rep = engine.agent(right).await.unwrap().unwrap().reputation_score;
        let wrong_rep = engine.agent(wrong).await.unwrap().unwrap().reputation_score;
        assert!((right_rep - 1.1).abs() < 1e-9);
        assert!((wrong_rep - 0.8).abs() < 1e-9);
        writer.stop().await;
    }
}
