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

//! # CORTEX Engine
//!
//! The embedded library surface. An [`Engine`] owns the storage substrate
//! (single writer + read pool), the ledger, the fact store, the retrieval
//! pipeline, the consensus and compaction engines, and auth, all wired by
//! [`EngineBuilder`] with no hidden globals: the embedder, master key and
//! metrics sink are dependency-injected handles.
//!
//! ```no_run
//! use cortex_engine::EngineBuilder;
//! use cortex_facts::StoreFact;
//!
//! # async fn demo() -> cortex_types::Result<()> {
//! let engine = EngineBuilder::from_env().build().await?;
//! let id = engine
//!     .store(StoreFact::new("sim", "CORTEX remembers this.", "tenant-1"))
//!     .await?;
//! let hits = engine.recall("sim", "tenant-1", None, 0).await?;
//! assert_eq!(hits[0].id, id);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// The blocking facade for synchronous embedders.
pub mod blocking;
/// The engine facade and its builder.
pub mod engine;
/// Database snapshots (VACUUM INTO + sibling metadata).
pub mod snapshots;

pub use engine::{Engine, EngineBuilder};
pub use snapshots::{SnapshotManager, SnapshotRecord};

/// Process exit code for success when embedded in a CLI host.
pub const EXIT_OK: i32 = 0;
/// Exit code for validation errors.
pub const EXIT_VALIDATION: i32 = 1;
/// Exit code for storage or integrity errors.
pub const EXIT_STORAGE: i32 = 2;
/// Exit code for auth or permission errors.
pub const EXIT_AUTH: i32 = 3;
