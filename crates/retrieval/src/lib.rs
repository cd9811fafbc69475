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

//! # CORTEX Retrieval
//!
//! The hybrid retrieval pipeline: a dense-vector arm over an in-process
//! HNSW index, a lexical arm over the FTS5 shadow index, and Reciprocal
//! Rank Fusion combining them. Temporal and tenant filters apply on every
//! path; a missing vector index degrades searches to lexical-only and never
//! errors.

/// The asynchronous embedding backfill worker.
pub mod backfill;
/// The embedding provider contract and the local default implementation.
pub mod embedder;
/// The retrieval engine: arms, fusion, filters, graph expansion.
pub mod engine;
/// Reciprocal Rank Fusion.
pub mod fusion;
/// Graph expansion over the entity overlay.
pub mod graph;
/// The in-process HNSW vector index.
pub mod index;

pub use backfill::EmbeddingBackfill;
pub use embedder::{Embedder, FeatureHashEmbedder};
pub use engine::RetrievalEngine;
pub use index::VectorIndex;
