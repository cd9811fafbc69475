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

//! # CORTEX Compaction
//!
//! Content-level compaction against context rot: deduplication, error
//! consolidation and staleness pruning. Zero data loss: every "removed"
//! fact is deprecated, never deleted, so the ledger keeps both its creation
//! and its deprecation and `history`/`time_travel` still reach it.
//!
//! Exact duplicates cannot enter through `store` (it dedups); this engine
//! handles what storage-time dedup cannot see: normalized and near
//! duplicates, repeated errors, and rows gone stale.

/// The individual strategies.
pub mod strategies;

use cortex_facts::FactStore;
use cortex_storage::{sql_params, ReadPool, WriteWorker};
use cortex_types::compaction::{CompactionOptions, CompactionResult, CompactionStrategy};
use cortex_types::error::CoreError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Session-context rendering order for fact types.
const TYPE_ORDER: &[&str] = &[
    "axiom", "decision", "rule", "error", "knowledge", "ghost", "intent", "schema",
];

/// One `compaction_log` row, summarized.
#[derive(Debug, Clone, Serialize)]
pub struct CompactionLogEntry {
    pub id: i64,
    pub project: String,
    pub strategy: String,
    pub deprecated_count: usize,
    pub new_fact_id: Option<i64>,
    pub facts_before: i64,
    pub facts_after: i64,
    pub timestamp: String,
}

/// Compaction history and totals.
#[derive(Debug, Clone, Serialize)]
pub struct CompactionStats {
    pub total_compactions: usize,
    pub total_deprecated: usize,
    pub history: Vec<CompactionLogEntry>,
}

/// The compaction engine.
pub struct Compactor {
    store: Arc<FactStore>,
    writer: Arc<WriteWorker>,
    pool: Arc<ReadPool>,
}

impl Compactor {
    /// A compactor over the shared fact store and storage handles.
    pub fn new(store: Arc<FactStore>, writer: Arc<WriteWorker>, pool: Arc<ReadPool>) -> Self {
        Compactor {
            store,
            writer,
            pool,
        }
    }

    /// Runs compaction on a project. Strategies apply in declaration
    /// order; a dry run reports identical results without mutating.
    pub async fn compact(
        &self,
        project: &str,
        tenant_id: &str,
        options: CompactionOptions,
    ) -> Result<CompactionResult, CoreError> {
        let strategies = options
            .strategies
            .clone()
            .unwrap_or_else(|| CompactionStrategy::ALL.to_vec());

        let count_before = self.active_count(project, tenant_id).await?;
        let mut result = CompactionResult {
            project: project.to_string(),
            original_count: count_before,
            dry_run: options.dry_run,
            ..CompactionResult::default()
        };

        if strategies.contains(&CompactionStrategy::Dedup) {
            strategies::execute_dedup(
                &self.store,
                project,
                tenant_id,
                &mut result,
                options.dry_run,
                options.similarity_threshold,
            )
            .await?;
        }
        if strategies.contains(&CompactionStrategy::MergeErrors) {
            strategies::execute_merge_errors(
                &self.store,
                project,
                tenant_id,
                &mut result,
                options.dry_run,
            )
            .await?;
        }
        if strategies.contains(&CompactionStrategy::StalenessPrune) {
            strategies::execute_staleness_prune(
                &self.store,
                project,
                tenant_id,
                &mut result,
                options.dry_run,
                options.max_age_days,
                options.min_consensus,
            )
            .await?;
        }

        result.compacted_count = self.active_count(project, tenant_id).await?;
        if options.dry_run {
            // The dry-run deltas are hypothetical; report them anyway.
            result.compacted_count =
                count_before.saturating_sub(result.deprecated_ids.len() as u64);
        }

        if !options.dry_run && !result.deprecated_ids.is_empty() {
            self.log_compaction(&result).await?;
        }

        info!(
            project,
            before = result.original_count,
            after = result.compacted_count,
            dry_run = options.dry_run,
            "compaction complete"
        );
        Ok(result)
    }

    /// Renders the project's most relevant active facts as a dense
    /// markdown context block for LLM re-injection.
    pub async fn compact_session(
        &self,
        project: &str,
        tenant_id: &str,
        max_facts: usize,
    ) -> Result<String, CoreError> {
        let facts = self.store.recall(project, tenant_id, Some(max_facts), 0).await?;
        if facts.is_empty() {
            return Ok(format!("# {project}\n\nNo active facts.\n"));
        }

        let mut by_type: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for fact in &facts {
            let snippet: String = fact.content.chars().take(200).collect();
            by_type
                .entry(fact.fact_type.as_str().to_string())
                .or_default()
                .push(snippet);
        }

        let mut lines = vec![format!("# {project}"), String::new()];
        let mut append = |ft: &str, items: &[String]| {
            let mut title: Vec<char> = ft.chars().collect();
            if let Some(first) = title.first_mut() {
                *first = first.to_ascii_uppercase();
            }
            let title: String = title.into_iter().collect();
            lines.push(format!("## {title} ({})", items.len()));
            lines.push(String::new());
            for item in items {
                lines.push(format!("- {item}"));
            }
            lines.push(String::new());
        };
        for ft in TYPE_ORDER {
            if let Some(items) = by_type.get(*ft) {
                append(ft, items);
            }
        }
        for (ft, items) in &by_type {
            if !TYPE_ORDER.contains(&ft.as_str()) {
                append(ft, items);
            }
        }
        Ok(lines.join("\n"))
    }

    /// Compaction history and totals, optionally per project.
    pub async fn stats(&self, project: Option<&str>) -> Result<CompactionStats, CoreError> {
        let project = project.map(str::to_string);
        let rows: Vec<CompactionLogEntry> = self
            .pool
            .run(move |conn| {
                let mut sql = "SELECT id, project, strategy, original_ids, new_fact_id,
                                      facts_before, facts_after, timestamp
                               FROM compaction_log"
                    .to_string();
                let mut params: Vec<rusqlite::types::Value> = Vec::new();
                if let Some(project) = project {
                    sql.push_str(" WHERE project = ?");
                    params.push(rusqlite::types::Value::Text(project));
                }
                sql.push_str(" ORDER BY timestamp DESC LIMIT 20");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), |r| {
                        let original_ids: String = r.get(3)?;
                        let deprecated_count = serde_json::from_str::<Vec<i64>>(&original_ids)
                            .map(|v| v.len())
                            .unwrap_or(0);
                        Ok(CompactionLogEntry {
                            id: r.get(0)?,
                            project: r.get(1)?,
                            strategy: r.get(2)?,
                            deprecated_count,
                            new_fact_id: r.get(4)?,
                            facts_before: r.get(5)?,
                            facts_after: r.get(6)?,
                            timestamp: r.get(7)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        let total_deprecated = rows.iter().map(|r| r.deprecated_count).sum();
        Ok(CompactionStats {
            total_compactions: rows.len(),
            total_deprecated,
            history: rows,
        })
    }

    async fn active_count(&self, project: &str, tenant_id: &str) -> Result<u64, CoreError> {
        let project = project.to_string();
        let tenant = tenant_id.to_string();
        let count = self
            .pool
            .run(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM facts
                     WHERE project = ?1 AND tenant_id = ?2 AND valid_until IS NULL",
                    rusqlite::params![project, tenant],
                    |r| r.get::<_, i64>(0),
                )
            })
            .await?;
        Ok(count as u64)
    }

    async fn log_compaction(&self, result: &CompactionResult) -> Result<(), CoreError> {
        let original_ids = serde_json::to_string(&result.deprecated_ids)
            .unwrap_or_else(|_| "[]".to_string());
        self.writer
            .execute(
                "INSERT INTO compaction_log
                     (project, strategy, original_ids, new_fact_id, facts_before, facts_after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                sql_params![
                    result.project.as_str(),
                    result.strategies_applied.join(","),
                    original_ids,
                    result.new_fact_ids.first().copied(),
                    result.original_count as i64,
                    result.compacted_count as i64
                ],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_crypto::Encrypter;
    use cortex_facts::{PrivacyShield, StoreFact};
    use cortex_ledger::{Ledger, LedgerConfig};
    use cortex_types::fact::FactType;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        writer: Arc<WriteWorker>,
        store: Arc<FactStore>,
        compactor: Compactor,
    }

    async fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let path = dir.path().join("compact.db");
        let conn = cortex_storage::open_writer(&path).unwrap();
        cortex_storage::migrations::initialize(&conn).unwrap();
        drop(conn);
        let writer = Arc::new(WriteWorker::start(&path).unwrap());
        let pool = Arc::new(ReadPool::open(&path, 1, 4).unwrap());
        let ledger = Arc::new(Ledger::new(
            Arc::clone(&writer),
            Arc::clone(&pool),
            LedgerConfig::default(),
        ));
        let store = Arc::new(FactStore::new(
            Arc::clone(&writer),
            Arc::clone(&pool),
            ledger,
            Arc::new(Encrypter::disabled()),
            None,
            PrivacyShield::new(),
        ));
        let compactor = Compactor::new(Arc::clone(&store), Arc::clone(&writer), pool);
        Fixture {
            _dir: dir,
            writer,
            store,
            compactor,
        }
    }

    fn dedup_only() -> CompactionOptions {
        CompactionOptions {
            strategies: Some(vec![CompactionStrategy::Dedup]),
            ..CompactionOptions::default()
        }
    }

    #[tokio::test]
    async fn dedup_preserves_lineage() {
        let f = fixture().await;
        // Normalized duplicates: store-time dedup does not catch these.
        f.store
            .store(StoreFact::new("p", "The deploy pipeline uses blue-green rollout.", "t"))
            .await
            .unwrap();
        f.store
            .store(StoreFact::new("p", "The deploy pipeline uses blue-green rollout!", "t"))
            .await
            .unwrap();
        f.store
            .store(StoreFact::new("p", "the  deploy pipeline   uses blue-green rollout", "t"))
            .await
            .unwrap();

        let result = f.compactor.compact("p", "t", dedup_only()).await.unwrap();
        assert_eq!(result.original_count, 3);
        assert_eq!(result.compacted_count, 1);
        assert_eq!(result.deprecated_ids.len(), 2);

        // Zero data loss: all three rows remain in history.
        let history = f.store.history("p", "t", None).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().filter(|x| x.is_active()).count(), 1);
        // The oldest row is the survivor.
        assert_eq!(
            history.iter().find(|x| x.is_active()).map(|x| x.id),
            Some(1)
        );
        f.writer.stop().await;
    }

    #[tokio::test]
    async fn near_duplicates_fold_into_the_canonical() {
        let f = fixture().await;
        f.store
            .store(StoreFact::new("p", "Cache invalidation happens on write commit.", "t"))
            .await
            .unwrap();
        f.store
            .store(StoreFact::new("p", "Cache invalidation happens on write commits.", "t"))
            .await
            .unwrap();
        f.store
            .store(StoreFact::new("p", "Completely unrelated architectural statement.", "t"))
            .await
            .unwrap();

        let result = f.compactor.compact("p", "t", dedup_only()).await.unwrap();
        assert_eq!(result.deprecated_ids, vec![2]);
        assert_eq!(result.compacted_count, 2);
        f.writer.stop().await;
    }

    #[tokio::test]
    async fn merge_errors_consolidates_repeats() {
        let f = fixture().await;
        // Same error recorded with cosmetic differences.
        for suffix in ["", " ", "."] {
            f.store
                .store({
                    let mut req = StoreFact::new(
                        "p",
                        format!("Connection timeout contacting billing service{suffix}"),
                        "t",
                    );
                    req.fact_type = FactType::Error;
                    req
                })
                .await
                .unwrap();
        }
        let options = CompactionOptions {
            strategies: Some(vec![CompactionStrategy::MergeErrors]),
            ..CompactionOptions::default()
        };
        let result = f.compactor.compact("p", "t", options).await.unwrap();
        assert_eq!(result.deprecated_ids.len(), 3);
        assert_eq!(result.new_fact_ids.len(), 1);

        let active = f.store.recall("p", "t", None, 0).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].content.contains("3 occurrences"));
        assert_eq!(active[0].fact_type, FactType::Error);
        f.writer.stop().await;
    }

    #[tokio::test]
    async fn staleness_prunes_old_low_consensus_rows() {
        let f = fixture().await;
        let keep = f
            .store
            .store(StoreFact::new("p", "Fresh fact that must survive pruning.", "t"))
            .await
            .unwrap();
        let stale = f
            .store
            .store(StoreFact::new("p", "Ancient fact with weak consensus.", "t"))
            .await
            .unwrap();
        f.writer
            .execute(
                "UPDATE facts SET created_at = '2020-01-01T00:00:00.000000Z',
                        consensus_score = 0.2 WHERE id = ?1",
                sql_params![stale],
            )
            .await
            .unwrap();

        let options = CompactionOptions {
            strategies: Some(vec![CompactionStrategy::StalenessPrune]),
            max_age_days: 90,
            min_consensus: 0.5,
            ..CompactionOptions::default()
        };
        let result = f.compactor.compact("p", "t", options).await.unwrap();
        assert_eq!(result.deprecated_ids, vec![stale]);

        let active = f.store.recall("p", "t", None, 0).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, keep);
        let history = f.store.history("p", "t", None).await.unwrap();
        let pruned = history.iter().find(|x| x.id == stale).unwrap();
        assert_eq!(
            pruned.meta.get("deprecation_reason").and_then(|v| v.as_str()),
            Some("stale")
        );
        f.writer.stop().await;
    }

    #[tokio::test]
    async fn dry_run_reports_without_mutating() {
        let f = fixture().await;
        f.store
            .store(StoreFact::new("p", "A duplicated observation, once.", "t"))
            .await
            .unwrap();
        f.store
            .store(StoreFact::new("p", "A duplicated observation, once!", "t"))
            .await
            .unwrap();

        let options = CompactionOptions {
            strategies: Some(vec![CompactionStrategy::Dedup]),
            dry_run: true,
            ..CompactionOptions::default()
        };
        let result = f.compactor.compact("p", "t", options).await.unwrap();
        assert_eq!(result.deprecated_ids.len(), 1);
        assert!(result.dry_run);
        assert_eq!(result.compacted_count, 1);

        // Nothing actually changed.
        assert_eq!(f.store.recall("p", "t", None, 0).await.unwrap().len(), 2);
        assert_eq!(f.compactor.stats(None).await.unwrap().total_compactions, 0);
        f.writer.stop().await;
    }

    #[tokio::test]
    async fn compaction_is_logged() {
        let f = fixture().await;
        f.store
            .store(StoreFact::new("p", "Logged compaction duplicate one.", "t"))
            .await
            .unwrap();
        f.store
            .store(StoreFact::new("p", "Logged compaction duplicate one!", "t"))
            .await
            .unwrap();
        f.compactor.compact("p", "t", dedup_only()).await.unwrap();

        let stats = f.compactor.stats(Some("p")).await.unwrap();
        assert_eq!(stats.total_compactions, 1);
        assert_eq!(stats.total_deprecated, 1);
        assert_eq!(stats.history[0].strategy, "dedup");
        f.writer.stop().await;
    }

    #[tokio::test]
    async fn session_context_groups_by_type() {
        let f = fixture().await;
        f.store
            .store({
                let mut req = StoreFact::new("p", "Always verify the ledger after restores.", "t");
                req.fact_type = FactType::Rule;
                req
            })
            .await
            .unwrap();
        f.store
            .store(StoreFact::new("p", "The system stores embeddings per fact.", "t"))
            .await
            .unwrap();

        let context = f.compactor.compact_session("p", "t", 50).await.unwrap();
        assert!(context.starts_with("# p"));
        assert!(context.contains("## Rule (1)"));
        assert!(context.contains("## Knowledge (1)"));
        f.writer.stop().await;
    }
}
