#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]

//! # CORTEX Crypto
//!
//! Deterministic serialization and the cryptographic primitives the ledger
//! and the fact store depend on:
//!
//! - canonical JSON (byte-identical across runs and platforms),
//! - transaction hashing (v2 emitted, legacy v1 accepted on verification),
//! - binary Merkle trees over transaction hashes,
//! - per-tenant AEAD envelope encryption derived from a process-wide
//!   master key.

/// Canonical JSON serialization.
pub mod canonical;
/// Per-tenant AEAD envelope encryption.
pub mod envelope;
/// Transaction hash derivation (v1 and v2).
pub mod hash;
/// Binary Merkle tree over hex-string leaves.
pub mod merkle;

pub use canonical::canonical_json;
pub use envelope::{Encrypter, MasterKey};
pub use hash::{tx_hash_v1, tx_hash_v2};
pub use merkle::MerkleTree;
