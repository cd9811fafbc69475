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

//! # CORTEX Facts
//!
//! The fact sovereign layer: lifecycle (store, update, deprecate), temporal
//! queries (recall, history, time-travel), the privacy shield that flags
//! secrets at ingress, ghost references, and the best-effort entity overlay
//! with its graph outbox.
//!
//! Deprecation is never physical deletion (it closes the validity
//! interval), and every mutation appends exactly one ledger transaction.

/// Best-effort entity extraction and the graph outbox.
pub mod extract;
/// The privacy shield: secret patterns as data.
pub mod privacy;
/// Row decoding shared by the query paths.
pub mod row;
/// The fact store itself.
pub mod store;

pub use privacy::{PrivacyReport, PrivacyShield};
pub use store::{FactStore, StoreFact, StoreStats};
