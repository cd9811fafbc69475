//! The engine facade and its builder.

use crate::snapshots::{SnapshotManager, SnapshotRecord};
use cortex_auth::{AuthManager, RateLimiter, SovereignGate, SqliteAuthBackend};
use cortex_compaction::{CompactionStats, Compactor};
use cortex_consensus::ConsensusEngine;
use cortex_crypto::envelope::MasterKey;
use cortex_crypto::Encrypter;
use cortex_facts::privacy::PrivacyPattern;
use cortex_facts::{FactStore, PrivacyShield, StoreFact, StoreStats};
use cortex_ledger::{Ledger, LedgerConfig};
use cortex_retrieval::{
    Embedder, EmbeddingBackfill, FeatureHashEmbedder, RetrievalEngine, VectorIndex,
};
use cortex_storage::{ReadPool, WriteWorker};
use cortex_types::compaction::{CompactionOptions, CompactionResult};
use cortex_types::config::CortexConfig;
use cortex_types::consensus::{OutcomeStatus, VoteReceipt, VoteValue};
use cortex_types::error::{CoreError, CryptoError};
use cortex_types::fact::{Fact, FactMeta};
use cortex_types::ledger::IntegrityReport;
use cortex_types::search::{SearchRequest, SearchResult};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Builds an [`Engine`] with dependency-injected collaborators.
pub struct EngineBuilder {
    config: CortexConfig,
    master_key: Option<MasterKey>,
    embedder: Option<Arc<dyn Embedder>>,
    use_default_embedder: bool,
    prometheus: bool,
}

impl EngineBuilder {
    /// A builder over an explicit configuration.
    pub fn new(config: CortexConfig) -> Self {
        EngineBuilder {
            config,
            master_key: None,
            embedder: None,
            use_default_embedder: true,
            prometheus: false,
        }
    }

    /// Configuration from `CORTEX_*` environment variables, including the
    /// master key from `CORTEX_MASTER_KEY` when present.
    pub fn from_env() -> Self {
        let mut builder = Self::new(CortexConfig::from_env());
        if let Ok(encoded) = std::env::var("CORTEX_MASTER_KEY") {
            match MasterKey::from_base64(&encoded) {
                Ok(key) => builder.master_key = Some(key),
                Err(e) => warn!("ignoring invalid CORTEX_MASTER_KEY: {e}"),
            }
        }
        builder
    }

    /// Supplies the envelope master key.
    pub fn master_key(mut self, key: MasterKey) -> Self {
        self.master_key = Some(key);
        self
    }

    /// Supplies a production embedding provider.
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Disables the vector arm entirely (text-only mode).
    pub fn without_embedder(mut self) -> Self {
        self.embedder = None;
        self.use_default_embedder = false;
        self
    }

    /// Installs the Prometheus metrics sink as the process-wide backend.
    pub fn with_prometheus_metrics(mut self) -> Self {
        self.prometheus = true;
        self
    }

    /// Opens the database, runs migrations, loads the vector index and
    /// wires every component.
    pub async fn build(self) -> Result<Engine, CoreError> {
        let config = self.config;
        if self.prometheus {
            if let Err(e) = cortex_telemetry::prometheus::install() {
                warn!("prometheus sink install failed: {e}");
            }
        }
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| cortex_types::error::StorageError::Backend(e.to_string()))?;
        }

        let embedder = match (self.embedder, self.use_default_embedder) {
            (Some(embedder), _) => Some(embedder),
            (None, true) => Some(Arc::new(FeatureHashEmbedder::new(config.embeddings_dim))
                as Arc<dyn Embedder>),
            (None, false) => None,
        };
        if let Some(embedder) = &embedder {
            if embedder.dimension() != config.embeddings_dim {
                return Err(CoreError::Retrieval(
                    cortex_types::error::RetrievalError::DimensionMismatch {
                        got: embedder.dimension(),
                        expected: config.embeddings_dim,
                    },
                ));
            }
        }

        // Bootstrap on a short-lived writer-mode connection, then hand the
        // file to the worker thread.
        let db_path = config.db_path.clone();
        let dim = config.embeddings_dim;
        let vector_enabled = embedder.is_some();
        let (schema_version, index, custom_patterns) =
            tokio::task::spawn_blocking(move || -> Result<_, CoreError> {
                let conn = cortex_storage::open_writer(&db_path)?;
                let version = cortex_storage::migrations::initialize(&conn)?;
                let index = if vector_enabled {
                    VectorIndex::load(&conn, dim)
                        .map_err(cortex_storage::substrate::map_sqlite_err)?
                } else {
                    VectorIndex::new(0)
                };
                let mut stmt = conn
                    .prepare("SELECT pattern_id, pattern, severity FROM threat_intel")
                    .map_err(cortex_storage::substrate::map_sqlite_err)?;
                let custom: Vec<PrivacyPattern> = stmt
                    .query_map([], |r| {
                        Ok(PrivacyPattern {
                            id: r.get(0)?,
                            pattern: r.get(1)?,
                            severity: r.get(2)?,
                        })
                    })
                    .map_err(cortex_storage::substrate::map_sqlite_err)?
                    .collect::<Result<_, _>>()
                    .map_err(cortex_storage::substrate::map_sqlite_err)?;
                Ok((version, index, custom))
            })
            .await
            .map_err(|e| cortex_types::error::StorageError::Backend(e.to_string()))??;

        let writer = Arc::new(WriteWorker::start(&config.db_path)?);
        let pool = Arc::new(ReadPool::open(
            &config.db_path,
            2.min(config.pool_size.max(1)),
            config.pool_size.max(1),
        )?);

        let ledger = Arc::new(Ledger::new(
            Arc::clone(&writer),
            Arc::clone(&pool),
            LedgerConfig {
                checkpoint_min: config.checkpoint_min,
                checkpoint_max: config.checkpoint_max,
                ..LedgerConfig::default()
            },
        ));

        let encrypter = Arc::new(Encrypter::new(self.master_key));
        let index = Arc::new(RwLock::new(index));
        let backfill = embedder.as_ref().map(|embedder| {
            Arc::new(EmbeddingBackfill::spawn(
                Arc::clone(&writer),
                Arc::clone(&index),
                Arc::clone(embedder),
                cortex_retrieval::backfill::DEFAULT_QUEUE_SIZE,
            ))
        });

        let facts = Arc::new(FactStore::new(
            Arc::clone(&writer),
            Arc::clone(&pool),
            Arc::clone(&ledger),
            Arc::clone(&encrypter),
            backfill.clone(),
            PrivacyShield::with_custom(custom_patterns),
        ));
        let retrieval = RetrievalEngine::new(
            Arc::clone(&pool),
            Arc::clone(&index),
            embedder,
            Arc::clone(&encrypter),
        );
        let consensus =
            ConsensusEngine::new(Arc::clone(&writer), Arc::clone(&pool), Arc::clone(&ledger));
        let compactor = Compactor::new(
            Arc::clone(&facts),
            Arc::clone(&writer),
            Arc::clone(&pool),
        );
        let auth = AuthManager::new(Arc::new(SqliteAuthBackend::new(
            Arc::clone(&writer),
            Arc::clone(&pool),
        )));
        auth.initialize().await?;
        let gate = SovereignGate::new(Arc::clone(&pool));
        let rate_limiter = RateLimiter::new(
            Duration::from_secs(config.rate_window_secs),
            config.rate_limit,
        );
        let snapshots = SnapshotManager::new(&config.db_path)?;

        info!(
            db = %config.db_path.display(),
            schema_version,
            vector = vector_enabled,
            "engine ready"
        );
        Ok(Engine {
            config,
            writer,
            pool,
            ledger,
            facts,
            retrieval,
            consensus,
            compactor,
            auth,
            gate,
            rate_limiter,
            snapshots,
            backfill,
            encrypter,
            metrics_debounce: cortex_telemetry::debounce::DebounceMap::new(
                Duration::from_secs(60),
            ),
        })
    }
}

/// The embedded engine. All mutating methods are async and return a
/// result carrying either the payload or a tagged error.
pub struct Engine {
    config: CortexConfig,
    writer: Arc<WriteWorker>,
    pool: Arc<ReadPool>,
    ledger: Arc<Ledger>,
    facts: Arc<FactStore>,
    retrieval: RetrievalEngine,
    consensus: ConsensusEngine,
    compactor: Compactor,
    auth: AuthManager,
    gate: SovereignGate,
    rate_limiter: RateLimiter,
    snapshots: SnapshotManager,
    backfill: Option<Arc<EmbeddingBackfill>>,
    encrypter: Arc<Encrypter>,
    metrics_debounce: cortex_telemetry::debounce::DebounceMap,
}

impl Engine {
    /// The effective configuration.
    pub fn config(&self) -> &CortexConfig {
        &self.config
    }

    /// Stores a fact (or returns the active duplicate's id).
    pub async fn store(&self, req: StoreFact) -> Result<i64, CoreError> {
        let fact_id = self.facts.store(req).await?;
        self.flush_metrics_snapshot().await;
        Ok(fact_id)
    }

    /// Stores a batch atomically.
    pub async fn store_many(&self, reqs: Vec<StoreFact>) -> Result<Vec<i64>, CoreError> {
        self.facts.store_many(reqs).await
    }

    /// Active facts of a project, best first.
    pub async fn recall(
        &self,
        project: &str,
        tenant_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Fact>, CoreError> {
        self.facts.recall(project, tenant_id, limit, offset).await
    }

    /// The project's full history, or the state at `as_of`.
    pub async fn history(
        &self,
        project: &str,
        tenant_id: &str,
        as_of: Option<&str>,
    ) -> Result<Vec<Fact>, CoreError> {
        self.facts.history(project, tenant_id, as_of).await
    }

    /// The facts active immediately after a ledger transaction.
    pub async fn time_travel(
        &self,
        tx_id: i64,
        tenant_id: &str,
        project: Option<&str>,
    ) -> Result<Vec<Fact>, CoreError> {
        self.facts.time_travel(tx_id, tenant_id, project).await
    }

    /// Creates a new version of a fact and deprecates the old.
    pub async fn update(
        &self,
        fact_id: i64,
        tenant_id: &str,
        content: Option<String>,
        tags: Option<Vec<String>>,
        meta: Option<FactMeta>,
    ) -> Result<i64, CoreError> {
        self.facts.update(fact_id, tenant_id, content, tags, meta).await
    }

    /// Marks a fact inactive.
    pub async fn deprecate(
        &self,
        fact_id: i64,
        tenant_id: &str,
        reason: Option<String>,
    ) -> Result<bool, CoreError> {
        self.facts.deprecate(fact_id, tenant_id, reason).await
    }

    /// Hybrid (or single-arm) search.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, CoreError> {
        Ok(self.retrieval.search(request).await?)
    }

    /// Registers a voting agent.
    pub async fn register_agent(
        &self,
        name: &str,
        agent_type: &str,
        public_key: Option<&str>,
    ) -> Result<i64, CoreError> {
        self.consensus.register_agent(name, agent_type, public_key).await
    }

    /// Casts a reputation-weighted vote.
    pub async fn vote(
        &self,
        fact_id: i64,
        agent_id: i64,
        value: i8,
        tenant_id: &str,
    ) -> Result<VoteReceipt, CoreError> {
        let value = VoteValue::try_from(value).map_err(CoreError::from)?;
        self.consensus.vote(fact_id, agent_id, value, tenant_id).await
    }

    /// The legacy unweighted vote path.
    pub async fn vote_v1(
        &self,
        fact_id: i64,
        agent: &str,
        value: i8,
        tenant_id: &str,
    ) -> Result<VoteReceipt, CoreError> {
        let value = VoteValue::try_from(value).map_err(CoreError::from)?;
        self.consensus.vote_v1(fact_id, agent, value, tenant_id).await
    }

    /// Records a pending outcome for a fact.
    pub async fn record_outcome(
        &self,
        fact_id: i64,
        detail: Option<&str>,
    ) -> Result<i64, CoreError> {
        self.consensus.record_outcome(fact_id, detail).await
    }

    /// Resolves an outcome, adjusting voter reputations.
    pub async fn resolve_outcome(
        &self,
        outcome_id: i64,
        status: OutcomeStatus,
    ) -> Result<(), CoreError> {
        self.consensus.resolve_outcome(outcome_id, status).await
    }

    /// Verifies the hash chain and every Merkle checkpoint.
    pub async fn verify_ledger(&self) -> Result<IntegrityReport, CoreError> {
        Ok(self.ledger.verify_integrity().await?)
    }

    /// Runs compaction on a project.
    pub async fn compact(
        &self,
        project: &str,
        tenant_id: &str,
        options: CompactionOptions,
    ) -> Result<CompactionResult, CoreError> {
        self.compactor.compact(project, tenant_id, options).await
    }

    /// Renders a dense markdown context block for LLM re-injection.
    pub async fn compact_session(
        &self,
        project: &str,
        tenant_id: &str,
        max_facts: usize,
    ) -> Result<String, CoreError> {
        self.compactor.compact_session(project, tenant_id, max_facts).await
    }

    /// Compaction history and totals.
    pub async fn compaction_stats(
        &self,
        project: Option<&str>,
    ) -> Result<CompactionStats, CoreError> {
        self.compactor.stats(project).await
    }

    /// Aggregate statistics over the fact layer.
    pub async fn stats(&self) -> Result<StoreStats, CoreError> {
        self.facts.stats().await
    }

    /// Exports a snapshot named `name`, stamped with the current ledger
    /// head and latest Merkle root.
    pub async fn export_snapshot(&self, name: &str) -> Result<SnapshotRecord, CoreError> {
        let head = self
            .pool
            .run(|conn| {
                let tx_id: i64 = conn.query_row(
                    "SELECT COALESCE(MAX(id), 0) FROM transactions",
                    [],
                    |r| r.get(0),
                )?;
                let root: Option<String> = conn
                    .query_row(
                        "SELECT root_hash FROM merkle_roots ORDER BY id DESC LIMIT 1",
                        [],
                        |r| r.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                Ok((tx_id, root))
            })
            .await?;
        let (tx_id, root) = head;
        Ok(self
            .snapshots
            .create(&self.writer, name, tx_id, root.as_deref().unwrap_or(""))
            .await?)
    }

    /// Lists exported snapshots, newest first.
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>, CoreError> {
        Ok(self.snapshots.list().await?)
    }

    /// Direct access to the fact store.
    pub fn facts(&self) -> &Arc<FactStore> {
        &self.facts
    }

    /// The API-key manager.
    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    /// The sovereign gate.
    pub fn gate(&self) -> &SovereignGate {
        &self.gate
    }

    /// The edge rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Errors unless a master key is present. Host layers call this
    /// before accepting encrypted-mutation requests.
    pub fn require_master_key(&self) -> Result<(), CoreError> {
        if self.encrypter.has_key() {
            Ok(())
        } else {
            Err(CryptoError::MasterKeyMissing.into())
        }
    }

    /// Requests a PASSIVE WAL checkpoint.
    pub async fn checkpoint(&self) -> Result<i64, CoreError> {
        Ok(self.writer.checkpoint().await?)
    }

    /// Drains pending graph-outbox rows through `deliver`. Successful rows
    /// are marked sent; repeatedly failing rows are parked. Returns
    /// `(sent, parked)`.
    pub async fn drain_graph_outbox<F>(&self, deliver: F) -> Result<(usize, usize), CoreError>
    where
        F: Fn(&cortex_facts::extract::OutboxRow) -> bool,
    {
        Ok(cortex_facts::extract::drain_outbox(&self.writer, &self.pool, deliver).await?)
    }

    /// Debounced persistence of a metrics snapshot into `memory_events`.
    /// At most one row per key per window; called opportunistically after
    /// mutations, failures are logged and swallowed.
    pub async fn flush_metrics_snapshot(&self) {
        if !self.metrics_debounce.should_persist("engine_stats") {
            return;
        }
        match self.facts.stats().await {
            Ok(stats) => {
                let payload = serde_json::to_string(&stats).unwrap_or_else(|_| "{}".to_string());
                if let Err(e) = self
                    .writer
                    .execute(
                        "INSERT INTO memory_events (event_type, payload) VALUES ('stats', ?1)",
                        vec![cortex_storage::SqlValue::Text(payload)],
                    )
                    .await
                {
                    warn!("metrics snapshot flush failed: {e}");
                }
            }
            Err(e) => warn!("metrics snapshot collection failed: {e}"),
        }
    }

    /// Graceful shutdown: drains the embedding queue, stops the writer
    /// (which drains its own queue and truncates the WAL) and closes the
    /// read pool. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(backfill) = &self.backfill {
            backfill.close().await;
        }
        self.writer.stop().await;
        self.pool.close();
        info!("engine shut down");
    }
}
