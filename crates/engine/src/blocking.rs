//! The blocking facade.
//!
//! The engine's public API is async-only; embedders without an async
//! runtime wrap it here. The facade owns a private multi-thread runtime
//! and drives every call with `block_on`.

use crate::engine::{Engine, EngineBuilder};
use cortex_facts::StoreFact;
use cortex_types::error::{CoreError, StorageError};
use cortex_types::fact::Fact;
use cortex_types::ledger::IntegrityReport;
use cortex_types::search::{SearchRequest, SearchResult};
use tokio::runtime::Runtime;

/// A synchronous wrapper around [`Engine`].
pub struct BlockingEngine {
    runtime: Runtime,
    engine: Engine,
}

impl BlockingEngine {
    /// Builds the engine on a private runtime.
    pub fn build(builder: EngineBuilder) -> Result<Self, CoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let engine = runtime.block_on(builder.build())?;
        Ok(BlockingEngine { runtime, engine })
    }

    /// The wrapped async engine, for mixed embedders.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Blocking [`Engine::store`].
    pub fn store(&self, req: StoreFact) -> Result<i64, CoreError> {
        self.runtime.block_on(self.engine.store(req))
    }

    /// Blocking [`Engine::recall`].
    pub fn recall(
        &self,
        project: &str,
        tenant_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Fact>, CoreError> {
        self.runtime
            .block_on(self.engine.recall(project, tenant_id, limit, 0))
    }

    /// Blocking [`Engine::search`].
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, CoreError> {
        self.runtime.block_on(self.engine.search(request))
    }

    /// Blocking [`Engine::deprecate`].
    pub fn deprecate(
        &self,
        fact_id: i64,
        tenant_id: &str,
        reason: Option<String>,
    ) -> Result<bool, CoreError> {
        self.runtime
            .block_on(self.engine.deprecate(fact_id, tenant_id, reason))
    }

    /// Blocking [`Engine::verify_ledger`].
    pub fn verify_ledger(&self) -> Result<IntegrityReport, CoreError> {
        self.runtime.block_on(self.engine.verify_ledger())
    }

    /// Blocking shutdown.
    pub fn shutdown(self) {
        self.runtime.block_on(self.engine.shutdown());
    }
}
