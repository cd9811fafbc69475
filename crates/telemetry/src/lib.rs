#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # CORTEX Telemetry
//!
//! Observability infrastructure for the engine: structured logging
//! initialization, abstract metrics sinks that decouple instrumentation
//! from the backend, a Prometheus-backed sink implementation, and a
//! debounced flush map that bounds how often counter snapshots are
//! persisted.

/// A debounce map bounding the frequency of metric snapshot persistence.
pub mod debounce;
/// The initialization routine for global structured logging.
pub mod init;
/// The concrete implementation of metrics sinks using the `prometheus` crate.
pub mod prometheus;
/// Abstract traits (`*MetricsSink`) that define the contract for metrics reporting.
pub mod sinks;
/// A simple RAII timer for measuring the duration of a scope.
pub mod time;

pub use sinks::{auth_metrics, ledger_metrics, search_metrics, store_metrics, writer_metrics};
