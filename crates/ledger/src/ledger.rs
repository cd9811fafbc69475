//! Append, checkpoint and verify.

use crate::clock::{MonotonicClock, SystemClock};
use cortex_crypto::{canonical_json, merkle, tx_hash_v1, tx_hash_v2};
use cortex_storage::{sql_params, ReadPool, WriteWorker};
use cortex_telemetry::ledger_metrics;
use cortex_types::error::LedgerError;
use cortex_types::ledger::{IntegrityReport, IntegrityViolation, GENESIS_HASH};
use cortex_types::time::now_iso;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Tuning for adaptive checkpointing.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Batch size under a high write rate.
    pub checkpoint_min: u64,
    /// Batch size during calm periods.
    pub checkpoint_max: u64,
    /// Trailing window for write-rate estimation.
    pub write_rate_window: Duration,
    /// Writes per second above which the batch shrinks.
    pub high_write_threshold: f64,
    /// Bound on the write-timestamp deque.
    pub rate_buffer: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            checkpoint_min: 100,
            checkpoint_max: 1000,
            write_rate_window: Duration::from_secs(60),
            high_write_threshold: 10.0,
            rate_buffer: 5000,
        }
    }
}

/// The hash-chained transaction ledger.
pub struct Ledger {
    writer: Arc<WriteWorker>,
    pool: Arc<ReadPool>,
    config: LedgerConfig,
    clock: Arc<dyn MonotonicClock>,
    write_timestamps: StdMutex<VecDeque<Duration>>,
}

impl Ledger {
    /// A ledger over the given writer and read pool.
    pub fn new(writer: Arc<WriteWorker>, pool: Arc<ReadPool>, config: LedgerConfig) -> Self {
        Self::with_clock(writer, pool, config, Arc::new(SystemClock::new()))
    }

    /// Same, with an explicit clock (tests inject a fake one).
    pub fn with_clock(
        writer: Arc<WriteWorker>,
        pool: Arc<ReadPool>,
        config: LedgerConfig,
        clock: Arc<dyn MonotonicClock>,
    ) -> Self {
        Ledger {
            writer,
            pool,
            config,
            clock,
            write_timestamps: StdMutex::new(VecDeque::new()),
        }
    }

    /// Appends one transaction and returns its id.
    ///
    /// Runs on the writer connection, so an open transaction scope observes
    /// its own earlier appends and chain continuity holds within batches.
    /// After the insert the predecessor is re-read and the hash repaired if
    /// a different predecessor was observed, a defense kept even though the
    /// single-writer queue already serializes appends.
    pub async fn append(
        &self,
        project: &str,
        action: &str,
        detail: &Value,
    ) -> Result<i64, LedgerError> {
        let detail_json =
            canonical_json(detail).map_err(|e| LedgerError::Append(e.to_string()))?;
        let timestamp = now_iso();

        let prev_hash = self
            .writer
            .query_row("SELECT hash FROM transactions ORDER BY id DESC LIMIT 1", vec![])
            .await
            .map_err(|e| LedgerError::Append(e.to_string()))?
            .and_then(|row| row.into_iter().next())
            .and_then(|cell| cell.into_string())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let hash = tx_hash_v2(&prev_hash, project, action, &detail_json, &timestamp);
        let outcome = self
            .writer
            .execute(
                "INSERT INTO transactions (project, action, detail, prev_hash, hash, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                sql_params![project, action, detail_json.as_str(), prev_hash.as_str(), hash.as_str(), timestamp.as_str()],
            )
            .await
            .map_err(|e| LedgerError::Append(e.to_string()))?;
        let tx_id = outcome.last_insert_rowid;

        let observed_prev = self
            .writer
            .query_row(
                "SELECT hash FROM transactions WHERE id < ?1 ORDER BY id DESC LIMIT 1",
                sql_params![tx_id],
            )
            .await
            .map_err(|e| LedgerError::Append(e.to_string()))?
            .and_then(|row| row.into_iter().next())
            .and_then(|cell| cell.into_string())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        if observed_prev != prev_hash {
            warn!(tx_id, "predecessor changed under append; repairing hash");
            let repaired = tx_hash_v2(&observed_prev, project, action, &detail_json, &timestamp);
            self.writer
                .execute(
                    "UPDATE transactions SET prev_hash = ?1, hash = ?2 WHERE id = ?3",
                    sql_params![observed_prev, repaired, tx_id],
                )
                .await
                .map_err(|e| LedgerError::Append(e.to_string()))?;
        }

        self.record_write();
        ledger_metrics().inc_transactions();

        // Opportunistic checkpoint; failures are logged, never surfaced.
        if let Err(e) = self.create_checkpoint().await {
            warn!("auto-checkpoint failed: {e}");
        }

        Ok(tx_id)
    }

    /// Pushes the current instant onto the bounded rate deque.
    pub fn record_write(&self) {
        let now = self.clock.now();
        if let Ok(mut deque) = self.write_timestamps.lock() {
            deque.push_back(now);
            while deque.len() > self.config.rate_buffer {
                deque.pop_front();
            }
        }
    }

    /// The checkpoint batch size implied by the recent write rate: the
    /// configured minimum while writes are bursting, the maximum otherwise.
    pub fn adaptive_batch_size(&self) -> u64 {
        let now = self.clock.now();
        let cutoff = now.saturating_sub(self.config.write_rate_window);
        let recent = self
            .write_timestamps
            .lock()
            .map(|deque| deque.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0);
        let rate = recent as f64 / self.config.write_rate_window.as_secs_f64();
        if rate > self.config.high_write_threshold {
            self.config.checkpoint_min
        } else {
            self.config.checkpoint_max
        }
    }

    /// Creates a Merkle checkpoint when enough transactions are pending.
    /// Returns the checkpoint id, or `None` when pending < batch size.
    pub async fn create_checkpoint(&self) -> Result<Option<i64>, LedgerError> {
        let batch_size = self.adaptive_batch_size();

        let scan = self
            .pool
            .run(move |conn| {
                let last_tx: i64 = conn.query_row(
                    "SELECT COALESCE(MAX(tx_end_id), 0) FROM merkle_roots",
                    [],
                    |r| r.get(0),
                )?;
                let pending: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM transactions WHERE id > ?1",
                    [last_tx],
                    |r| r.get(0),
                )?;
                Ok((last_tx, pending))
            })
            .await
            .map_err(|e| LedgerError::Checkpoint(e.to_string()))?;
        let (last_tx, pending) = scan;

        if (pending as u64) < batch_size {
            return Ok(None);
        }

        let start_id = last_tx + 1;
        let root = self
            .pool
            .run(move |conn| {
                // The id of the batch's last transaction, then the hashes.
                let end_id: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM transactions WHERE id >= ?1
                         ORDER BY id LIMIT 1 OFFSET ?2",
                        rusqlite::params![start_id, (batch_size - 1) as i64],
                        |r| r.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                let Some(end_id) = end_id else {
                    return Ok(None);
                };
                let mut stmt = conn.prepare(
                    "SELECT hash FROM transactions WHERE id >= ?1 AND id <= ?2 ORDER BY id",
                )?;
                let hashes: Vec<String> = stmt
                    .query_map(rusqlite::params![start_id, end_id], |r| r.get(0))?
                    .collect::<Result<_, _>>()?;
                Ok(merkle::merkle_root(hashes).map(|root| (root, end_id)))
            })
            .await
            .map_err(|e| LedgerError::Checkpoint(e.to_string()))?;

        let Some((root_hash, end_id)) = root else {
            return Ok(None);
        };

        let outcome = self
            .writer
            .execute(
                "INSERT INTO merkle_roots (root_hash, tx_start_id, tx_end_id, tx_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                sql_params![root_hash, start_id, end_id, batch_size as i64, now_iso()],
            )
            .await
            .map_err(|e| LedgerError::Checkpoint(e.to_string()))?;

        ledger_metrics().inc_merkle_checkpoints();
        info!(
            checkpoint = outcome.last_insert_rowid,
            start = start_id,
            end = end_id,
            "created Merkle checkpoint"
        );
        Ok(Some(outcome.last_insert_rowid))
    }

    /// Verifies chain continuity, per-transaction hashes (v2 or legacy v1)
    /// and every stored Merkle root. Records the run in `integrity_checks`.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let started_at = now_iso();
        let started = Instant::now();

        let report = self
            .pool
            .run(|conn| {
                let mut violations = Vec::new();
                let mut tx_checked = 0u64;

                let mut stmt = conn.prepare(
                    "SELECT id, prev_hash, hash, project, action, detail, timestamp
                     FROM transactions ORDER BY id",
                )?;
                let mut rows = stmt.query([])?;
                let mut expected_prev = GENESIS_HASH.to_string();
                while let Some(row) = rows.next()? {
                    let tx_id: i64 = row.get(0)?;
                    let prev_hash: String = row.get(1)?;
                    let hash: String = row.get(2)?;
                    let project: String = row.get(3)?;
                    let action: String = row.get(4)?;
                    let detail: String = row.get(5)?;
                    let timestamp: String = row.get(6)?;
                    tx_checked += 1;

                    if prev_hash != expected_prev {
                        violations.push(IntegrityViolation::ChainBreak {
                            tx_id,
                            expected: expected_prev.clone(),
                            actual: prev_hash.clone(),
                        });
                    }

                    let v2 = tx_hash_v2(&prev_hash, &project, &action, &detail, &timestamp);
                    let v1 = tx_hash_v1(&prev_hash, &project, &action, &detail, &timestamp);
                    if v2 != hash && v1 != hash {
                        violations.push(IntegrityViolation::HashMismatch {
                            tx_id,
                            computed_v2: v2,
                            computed_v1: v1,
                            stored: hash.clone(),
                        });
                    }
                    expected_prev = hash;
                }

                let mut stmt = conn.prepare(
                    "SELECT id, root_hash, tx_start_id, tx_end_id FROM merkle_roots ORDER BY id",
                )?;
                let checkpoints: Vec<(i64, String, i64, i64)> = stmt
                    .query_map([], |r| {
                        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
                    })?
                    .collect::<Result<_, _>>()?;
                let roots_checked = checkpoints.len() as u64;

                for (merkle_id, stored_root, start, end) in checkpoints {
                    let mut stmt = conn.prepare(
                        "SELECT hash FROM transactions WHERE id >= ?1 AND id <= ?2 ORDER BY id",
                    )?;
                    let hashes: Vec<String> = stmt
                        .query_map(rusqlite::params![start, end], |r| r.get(0))?
                        .collect::<Result<_, _>>()?;
                    let recomputed = merkle::merkle_root(hashes);
                    if recomputed.as_deref() != Some(stored_root.as_str()) {
                        violations.push(IntegrityViolation::MerkleMismatch {
                            merkle_id,
                            expected: stored_root,
                            actual: recomputed,
                        });
                    }
                }

                Ok(IntegrityReport {
                    valid: violations.is_empty(),
                    violations,
                    tx_checked,
                    roots_checked,
                })
            })
            .await
            .map_err(|e| LedgerError::Verification(e.to_string()))?;

        ledger_metrics().observe_verify_duration(started.elapsed().as_secs_f64());
        if !report.valid {
            error!(
                violations = report.violations.len(),
                "integrity check failed"
            );
        }

        let status = if report.valid { "ok" } else { "violation" };
        let details = serde_json::to_string(&report.violations)
            .map_err(|e| LedgerError::Verification(e.to_string()))?;
        self.writer
            .execute(
                "INSERT INTO integrity_checks (check_type, status, details, started_at, completed_at)
                 VALUES ('full', ?1, ?2, ?3, ?4)",
                sql_params![status, details, started_at, now_iso()],
            )
            .await
            .map_err(|e| LedgerError::Verification(e.to_string()))?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;
    use serde_json::json;
    use tempfile::tempdir;

    async fn fixture(
        config: LedgerConfig,
    ) -> (tempfile::TempDir, Arc<WriteWorker>, Arc<ReadPool>, Ledger) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let conn = cortex_storage::open_writer(&path).unwrap();
        cortex_storage::migrations::initialize(&conn).unwrap();
        drop(conn);
        let writer = Arc::new(WriteWorker::start(&path).unwrap());
        let pool = Arc::new(ReadPool::open(&path, 1, 4).unwrap());
        let ledger = Ledger::new(Arc::clone(&writer), Arc::clone(&pool), config);
        (dir, writer, pool, ledger)
    }

    #[tokio::test]
    async fn chain_starts_at_genesis_and_links() {
        let (_dir, writer, _pool, ledger) = fixture(LedgerConfig::default()).await;
        let t1 = ledger
            .append("sim", "store", &json!({"fact_id": 1}))
            .await
            .unwrap();
        let t2 = ledger
            .append("sim", "store", &json!({"fact_id": 2}))
            .await
            .unwrap();
        assert_eq!(t1, 1);
        assert_eq!(t2, 2);

        let row1 = writer
            .query_row("SELECT prev_hash, hash FROM transactions WHERE id = 1", vec![])
            .await
            .unwrap()
            .unwrap();
        let row2 = writer
            .query_row("SELECT prev_hash FROM transactions WHERE id = 2", vec![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row1[0].as_str(), Some(GENESIS_HASH));
        assert_eq!(row2[0].as_str(), row1[1].as_str());

        let report = ledger.verify_integrity().await.unwrap();
        assert!(report.valid);
        assert_eq!(report.tx_checked, 2);
        writer.stop().await;
    }

    #[tokio::test]
    async fn tamper_is_detected_and_recorded() {
        let (_dir, writer, _pool, ledger) = fixture(LedgerConfig::default()).await;
        for i in 0..3 {
            ledger
                .append("p", "store", &json!({"fact_id": i}))
                .await
                .unwrap();
        }
        writer
            .execute("UPDATE transactions SET detail = '{\"fact_id\":99}' WHERE id = 2", vec![])
            .await
            .unwrap();

        let report = ledger.verify_integrity().await.unwrap();
        assert!(!report.valid);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, IntegrityViolation::HashMismatch { tx_id: 2, .. })));

        // The run itself is recorded.
        let row = writer
            .query_row("SELECT status FROM integrity_checks ORDER BY id DESC LIMIT 1", vec![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row[0].as_str(), Some("violation"));
        writer.stop().await;
    }

    #[tokio::test]
    async fn checkpoint_created_after_batch_fills() {
        let config = LedgerConfig {
            checkpoint_min: 2,
            checkpoint_max: 3,
            ..LedgerConfig::default()
        };
        let (_dir, writer, _pool, ledger) = fixture(config).await;
        for i in 0..7 {
            ledger
                .append("p", "store", &json!({"fact_id": i}))
                .await
                .unwrap();
        }
        let row = writer
            .query_row(
                "SELECT COUNT(*), COALESCE(MAX(tx_end_id), 0) FROM merkle_roots",
                vec![],
            )
            .await
            .unwrap()
            .unwrap();
        assert!(row[0].as_i64().unwrap() >= 2);
        assert!(row[1].as_i64().unwrap() >= 6);

        let report = ledger.verify_integrity().await.unwrap();
        assert!(report.valid);
        assert!(report.roots_checked >= 2);
        writer.stop().await;
    }

    #[tokio::test]
    async fn adaptive_batch_shrinks_under_load() {
        let (_dir, writer, pool, _ledger) = fixture(LedgerConfig::default()).await;
        let clock = Arc::new(FakeClock::default());
        let config = LedgerConfig {
            checkpoint_min: 10,
            checkpoint_max: 100,
            high_write_threshold: 10.0,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_clock(writer.clone(), pool, config, clock.clone());

        // Calm: no recent writes.
        assert_eq!(ledger.adaptive_batch_size(), 100);

        // Burst: 700 writes inside one second.
        clock.advance(Duration::from_secs(120));
        for _ in 0..700 {
            ledger.record_write();
        }
        assert_eq!(ledger.adaptive_batch_size(), 10);

        // The window slides past the burst; the batch grows back.
        clock.advance(Duration::from_secs(120));
        assert_eq!(ledger.adaptive_batch_size(), 100);
        writer.stop().await;
    }
}
