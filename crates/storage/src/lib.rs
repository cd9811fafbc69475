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

//! # CORTEX Storage
//!
//! The storage substrate: hardened SQLite connections, the single-writer
//! serialization queue, the bounded read pool, and the schema/migration
//! runner.
//!
//! ## Concurrency model
//!
//! All mutations flow through one dedicated OS thread owning one writer
//! connection ([`writer::WriteWorker`]); readers never contend with it
//! thanks to WAL snapshots. `SQLITE_BUSY` is eliminated architecturally;
//! the substrate's `busy_timeout` is only a safety net.

/// Forward-only schema migrations.
pub mod migrations;
/// The bounded pool of read-only connections.
pub mod pool;
/// Base schema DDL and bootstrap.
pub mod schema;
/// The hardened connection factory and SQL value plumbing.
pub mod substrate;
/// The single-writer serialization queue.
pub mod writer;

pub use pool::ReadPool;
pub use substrate::{open_reader, open_writer, SqlValue};
pub use writer::{WriteOutcome, WriteWorker};
