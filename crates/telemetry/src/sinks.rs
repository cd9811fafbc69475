//! Defines abstract traits for metrics reporting, decoupling core logic from the backend.

use once_cell::sync::OnceCell;

// --- Static Sink Access ---

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A lazily-initialized static reference to the global `MetricsSink` implementation.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns a static reference to the configured fact-store metrics sink.
/// If no sink has been initialized, it returns a no-op sink.
pub fn store_metrics() -> &'static dyn StoreMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured write-worker metrics sink.
pub fn writer_metrics() -> &'static dyn WriterMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured ledger metrics sink.
pub fn ledger_metrics() -> &'static dyn LedgerMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured search metrics sink.
pub fn search_metrics() -> &'static dyn SearchMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured auth metrics sink.
pub fn auth_metrics() -> &'static dyn AuthMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

// --- Trait Definitions ---

/// A sink for metrics related to the fact store.
pub trait StoreMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter for facts stored, labeled by fact type.
    fn inc_facts_stored(&self, fact_type: &str);
    /// Increments the counter for store calls answered by the dedup no-op.
    fn inc_dedup_hits(&self);
    /// Increments the counter for facts deprecated.
    fn inc_facts_deprecated(&self);
    /// Increments the counter for privacy-shield flags raised.
    fn inc_privacy_flags(&self);
    /// Increments the counter for background task failures, labeled by task.
    fn inc_background_failures(&self, task: &str);
}
impl StoreMetricsSink for NopSink {
    fn inc_facts_stored(&self, _fact_type: &str) {}
    fn inc_dedup_hits(&self) {}
    fn inc_facts_deprecated(&self) {}
    fn inc_privacy_flags(&self) {}
    fn inc_background_failures(&self, _task: &str) {}
}

/// A sink for metrics related to the single-writer queue.
pub trait WriterMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter for writes executed.
    fn inc_writes(&self);
    /// Increments the counter for failed writes.
    fn inc_write_errors(&self);
    /// Increments the counter for WAL checkpoints issued.
    fn inc_checkpoints(&self);
    /// Sets the gauge for the current queue depth.
    fn set_queue_depth(&self, depth: u64);
}
impl WriterMetricsSink for NopSink {
    fn inc_writes(&self) {}
    fn inc_write_errors(&self) {}
    fn inc_checkpoints(&self) {}
    fn set_queue_depth(&self, _depth: u64) {}
}

/// A sink for metrics related to the ledger.
pub trait LedgerMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter for transactions appended.
    fn inc_transactions(&self);
    /// Increments the counter for Merkle checkpoints created.
    fn inc_merkle_checkpoints(&self);
    /// Observes the duration of a full-chain verification run.
    fn observe_verify_duration(&self, duration_secs: f64);
}
impl LedgerMetricsSink for NopSink {
    fn inc_transactions(&self) {}
    fn inc_merkle_checkpoints(&self) {}
    fn observe_verify_duration(&self, _duration_secs: f64) {}
}

/// A sink for metrics related to the retrieval engine.
pub trait SearchMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter for searches, labeled by arm (`semantic`,
    /// `lexical`, `hybrid`).
    fn inc_searches(&self, arm: &str);
    /// Observes end-to-end search latency, labeled by arm.
    fn observe_search_duration(&self, arm: &str, duration_secs: f64);
    /// Increments the counter for searches that fell back to lexical-only.
    fn inc_lexical_fallbacks(&self);
}
impl SearchMetricsSink for NopSink {
    fn inc_searches(&self, _arm: &str) {}
    fn observe_search_duration(&self, _arm: &str, _duration_secs: f64) {}
    fn inc_lexical_fallbacks(&self) {}
}

/// A sink for metrics related to authentication and authorization.
pub trait AuthMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter for authentication attempts, labeled by
    /// outcome (`ok`, `invalid_format`, `invalid_key`).
    fn inc_auth_attempts(&self, outcome: &str);
    /// Increments the counter for API keys created.
    fn inc_keys_created(&self);
    /// Increments the counter for RBAC permission denials.
    fn inc_rbac_denials(&self);
    /// Increments the counter for sovereign-gate consensus denials.
    fn inc_gate_denials(&self);
    /// Increments the counter for rate-limit rejections.
    fn inc_rate_limited(&self);
}
impl AuthMetricsSink for NopSink {
    fn inc_auth_attempts(&self, _outcome: &str) {}
    fn inc_keys_created(&self) {}
    fn inc_rbac_denials(&self) {}
    fn inc_gate_denials(&self) {}
    fn inc_rate_limited(&self) {}
}

/// The aggregate sink trait a backend must implement.
pub trait MetricsSink:
    StoreMetricsSink + WriterMetricsSink + LedgerMetricsSink + SearchMetricsSink + AuthMetricsSink
{
}
impl MetricsSink for NopSink {}
