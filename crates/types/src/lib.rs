#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # CORTEX Types
//!
//! This crate is the foundational library for CORTEX, containing all core
//! data structures, error types, and configuration objects.
//!
//! ## Architectural Role
//!
//! As the base crate, `cortex-types` has minimal dependencies and is itself a
//! dependency for almost every other crate in the workspace. This structure
//! prevents circular dependencies and provides a stable, canonical definition
//! for shared types like [`Fact`](fact::Fact),
//! [`LedgerTransaction`](ledger::LedgerTransaction) and the error enums.

/// A top-level, crate-wide `Result` type alias with a default error type.
pub type Result<T, E = crate::error::CoreError> = std::result::Result<T, E>;

/// API key, authentication result and RBAC vocabulary types.
pub mod auth;
/// Compaction strategies and the result record of a compaction run.
pub mod compaction;
/// Shared configuration loaded from `CORTEX_*` environment variables.
pub mod config;
/// Voting identities, votes and outcome records for the consensus layer.
pub mod consensus;
/// A unified set of all error types used across the workspace.
pub mod error;
/// The primary stored record: typed, tenant-scoped, temporally-bounded facts.
pub mod fact;
/// Ledger transactions, Merkle checkpoints and integrity reports.
pub mod ledger;
/// Search requests, fused results and graph expansion context.
pub mod search;
/// Timestamp helpers shared by every persisting component.
pub mod time;

/// The tenant every operation falls back to when none is supplied.
pub const DEFAULT_TENANT: &str = "default";

/// Maximum length of a `project` namespace string.
pub const MAX_PROJECT_LENGTH: usize = 256;

/// Minimum trimmed content length accepted by the fact store.
pub const MIN_CONTENT_LENGTH: usize = 10;
