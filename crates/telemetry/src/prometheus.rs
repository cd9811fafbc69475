//! A concrete implementation of the metrics sinks using the Prometheus crate.

use crate::sinks::*;
use once_cell::sync::OnceCell;
use prometheus::{
    register_gauge, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, Gauge, Histogram, HistogramVec, IntCounter, IntCounterVec,
};

// --- Metric Statics ---
// OnceCell holds the collectors; `install` initializes them exactly once.

static FACTS_STORED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static DEDUP_HITS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static FACTS_DEPRECATED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static PRIVACY_FLAGS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static BACKGROUND_FAILURES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static WRITES_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static WRITE_ERRORS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static WAL_CHECKPOINTS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static WRITER_QUEUE_DEPTH: OnceCell<Gauge> = OnceCell::new();
static LEDGER_TRANSACTIONS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static MERKLE_CHECKPOINTS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static LEDGER_VERIFY_DURATION_SECONDS: OnceCell<Histogram> = OnceCell::new();
static SEARCHES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static SEARCH_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static LEXICAL_FALLBACKS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static AUTH_ATTEMPTS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static KEYS_CREATED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static RBAC_DENIALS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static GATE_DENIALS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static RATE_LIMITED_TOTAL: OnceCell<IntCounter> = OnceCell::new();

/// The Prometheus-backed sink. Zero-sized; all state lives in the registry.
#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

macro_rules! with_metric {
    ($metric:ident, $op:expr) => {
        if let Some(m) = $metric.get() {
            #[allow(clippy::redundant_closure_call)]
            $op(m)
        }
    };
}

impl StoreMetricsSink for PrometheusSink {
    fn inc_facts_stored(&self, fact_type: &str) {
        with_metric!(FACTS_STORED_TOTAL, |m: &IntCounterVec| m
            .with_label_values(&[fact_type])
            .inc());
    }
    fn inc_dedup_hits(&self) {
        with_metric!(DEDUP_HITS_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_facts_deprecated(&self) {
        with_metric!(FACTS_DEPRECATED_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_privacy_flags(&self) {
        with_metric!(PRIVACY_FLAGS_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_background_failures(&self, task: &str) {
        with_metric!(BACKGROUND_FAILURES_TOTAL, |m: &IntCounterVec| m
            .with_label_values(&[task])
            .inc());
    }
}

impl WriterMetricsSink for PrometheusSink {
    fn inc_writes(&self) {
        with_metric!(WRITES_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_write_errors(&self) {
        with_metric!(WRITE_ERRORS_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_checkpoints(&self) {
        with_metric!(WAL_CHECKPOINTS_TOTAL, |m: &IntCounter| m.inc());
    }
    fn set_queue_depth(&self, depth: u64) {
        with_metric!(WRITER_QUEUE_DEPTH, |m: &Gauge| m.set(depth as f64));
    }
}

impl LedgerMetricsSink for PrometheusSink {
    fn inc_transactions(&self) {
        with_metric!(LEDGER_TRANSACTIONS_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_merkle_checkpoints(&self) {
        with_metric!(MERKLE_CHECKPOINTS_TOTAL, |m: &IntCounter| m.inc());
    }
    fn observe_verify_duration(&self, duration_secs: f64) {
        with_metric!(LEDGER_VERIFY_DURATION_SECONDS, |m: &Histogram| m
            .observe(duration_secs));
    }
}

impl SearchMetricsSink for PrometheusSink {
    fn inc_searches(&self, arm: &str) {
        with_metric!(SEARCHES_TOTAL, |m: &IntCounterVec| m
            .with_label_values(&[arm])
            .inc());
    }
    fn observe_search_duration(&self, arm: &str, duration_secs: f64) {
        with_metric!(SEARCH_DURATION_SECONDS, |m: &HistogramVec| m
            .with_label_values(&[arm])
            .observe(duration_secs));
    }
    fn inc_lexical_fallbacks(&self) {
        with_metric!(LEXICAL_FALLBACKS_TOTAL, |m: &IntCounter| m.inc());
    }
}

impl AuthMetricsSink for PrometheusSink {
    fn inc_auth_attempts(&self, outcome: &str) {
        with_metric!(AUTH_ATTEMPTS_TOTAL, |m: &IntCounterVec| m
            .with_label_values(&[outcome])
            .inc());
    }
    fn inc_keys_created(&self) {
        with_metric!(KEYS_CREATED_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_rbac_denials(&self) {
        with_metric!(RBAC_DENIALS_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_gate_denials(&self) {
        with_metric!(GATE_DENIALS_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_rate_limited(&self) {
        with_metric!(RATE_LIMITED_TOTAL, |m: &IntCounter| m.inc());
    }
}

impl MetricsSink for PrometheusSink {}

static PROM_SINK: PrometheusSink = PrometheusSink;

/// Registers all collectors with the default registry and installs the
/// Prometheus sink as the global one. Idempotent: a second call is a no-op.
pub fn install() -> Result<(), prometheus::Error> {
    if SINK.get().is_some() {
        return Ok(());
    }
    let _ = FACTS_STORED_TOTAL.set(register_int_counter_vec!(
        "cortex_facts_stored_total",
        "Facts stored, by fact type.",
        &["fact_type"]
    )?);
    let _ = DEDUP_HITS_TOTAL.set(register_int_counter!(
        "cortex_dedup_hits_total",
        "Store calls answered by the dedup no-op."
    )?);
    let _ = FACTS_DEPRECATED_TOTAL.set(register_int_counter!(
        "cortex_facts_deprecated_total",
        "Facts deprecated."
    )?);
    let _ = PRIVACY_FLAGS_TOTAL.set(register_int_counter!(
        "cortex_privacy_flags_total",
        "Privacy-shield flags raised on ingest."
    )?);
    let _ = BACKGROUND_FAILURES_TOTAL.set(register_int_counter_vec!(
        "cortex_background_failures_total",
        "Background task failures, by task.",
        &["task"]
    )?);
    let _ = WRITES_TOTAL.set(register_int_counter!(
        "cortex_writer_writes_total",
        "Write operations executed by the single writer."
    )?);
    let _ = WRITE_ERRORS_TOTAL.set(register_int_counter!(
        "cortex_writer_errors_total",
        "Write operations that failed."
    )?);
    let _ = WAL_CHECKPOINTS_TOTAL.set(register_int_counter!(
        "cortex_writer_wal_checkpoints_total",
        "WAL checkpoints issued by the writer."
    )?);
    let _ = WRITER_QUEUE_DEPTH.set(register_gauge!(
        "cortex_writer_queue_depth",
        "Current depth of the writer queue."
    )?);
    let _ = LEDGER_TRANSACTIONS_TOTAL.set(register_int_counter!(
        "cortex_ledger_transactions_total",
        "Ledger transactions appended."
    )?);
    let _ = MERKLE_CHECKPOINTS_TOTAL.set(register_int_counter!(
        "cortex_ledger_merkle_checkpoints_total",
        "Merkle checkpoints created."
    )?);
    let _ = LEDGER_VERIFY_DURATION_SECONDS.set(register_histogram!(
        "cortex_ledger_verify_duration_seconds",
        "Duration of full-chain verification runs."
    )?);
    let _ = SEARCHES_TOTAL.set(register_int_counter_vec!(
        "cortex_searches_total",
        "Searches executed, by arm.",
        &["arm"]
    )?);
    let _ = SEARCH_DURATION_SECONDS.set(register_histogram_vec!(
        "cortex_search_duration_seconds",
        "End-to-end search latency, by arm.",
        &["arm"]
    )?);
    let _ = LEXICAL_FALLBACKS_TOTAL.set(register_int_counter!(
        "cortex_lexical_fallbacks_total",
        "Hybrid searches that degraded to the lexical arm only."
    )?);
    let _ = AUTH_ATTEMPTS_TOTAL.set(register_int_counter_vec!(
        "cortex_auth_attempts_total",
        "Authentication attempts, by outcome.",
        &["outcome"]
    )?);
    let _ = KEYS_CREATED_TOTAL.set(register_int_counter!(
        "cortex_auth_keys_created_total",
        "API keys created."
    )?);
    let _ = RBAC_DENIALS_TOTAL.set(register_int_counter!(
        "cortex_auth_rbac_denials_total",
        "RBAC permission denials."
    )?);
    let _ = GATE_DENIALS_TOTAL.set(register_int_counter!(
        "cortex_auth_gate_denials_total",
        "Sovereign-gate consensus denials."
    )?);
    let _ = RATE_LIMITED_TOTAL.set(register_int_counter!(
        "cortex_auth_rate_limited_total",
        "Requests rejected by the rate limiter."
    )?);
    let _ = SINK.set(&PROM_SINK);
    Ok(())
}
