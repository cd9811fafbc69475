//! Ledger transactions, Merkle checkpoints and integrity reports.

use serde::{Deserialize, Serialize};

/// The literal `prev_hash` of the first transaction in a chain.
pub const GENESIS_HASH: &str = "GENESIS";

/// A single hash-chained audit record. One is appended for every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Monotone row id; chain order.
    pub id: i64,
    /// Project the mutation belonged to.
    pub project: String,
    /// The mutating verb (`store`, `deprecate`, `vote`, ...).
    pub action: String,
    /// Canonical-JSON detail payload, stored verbatim.
    pub detail: String,
    /// Hash of the predecessor transaction, or [`GENESIS_HASH`].
    pub prev_hash: String,
    /// Lowercase hex SHA-256 of this transaction.
    pub hash: String,
    /// Append timestamp (ISO-8601 UTC).
    pub timestamp: String,
}

/// An integrity waypoint: the Merkle root over a contiguous range of
/// transaction hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleCheckpoint {
    /// Checkpoint row id.
    pub id: i64,
    /// Root of the binary Merkle tree over `[tx_start_id, tx_end_id]`.
    pub root_hash: String,
    /// First transaction id covered (inclusive).
    pub tx_start_id: i64,
    /// Last transaction id covered (inclusive).
    pub tx_end_id: i64,
    /// Number of transactions covered.
    pub tx_count: i64,
    /// Creation timestamp (ISO-8601 UTC).
    pub created_at: String,
}

/// A single discrepancy found during ledger verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrityViolation {
    /// A transaction's `prev_hash` does not match its predecessor's hash.
    ChainBreak {
        /// The offending transaction.
        tx_id: i64,
        /// The hash the chain required.
        expected: String,
        /// The `prev_hash` actually stored.
        actual: String,
    },
    /// A stored hash matches neither the v2 nor the legacy v1 formula.
    HashMismatch {
        /// The offending transaction.
        tx_id: i64,
        /// Recomputed v2 hash.
        computed_v2: String,
        /// Recomputed legacy v1 hash.
        computed_v1: String,
        /// The hash actually stored.
        stored: String,
    },
    /// A checkpoint's recomputed Merkle root differs from the stored root.
    MerkleMismatch {
        /// The offending checkpoint.
        merkle_id: i64,
        /// The root stored in the checkpoint row.
        expected: String,
        /// The recomputed root, if the range still yields one.
        actual: Option<String>,
    },
}

/// The outcome of a full-chain verification run.
///
/// Violations are reported, never remediated; repair is an explicit
/// operator action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// True iff no violations were found.
    pub valid: bool,
    /// Every discrepancy found, in chain order.
    pub violations: Vec<IntegrityViolation>,
    /// Number of transactions examined.
    pub tx_checked: u64,
    /// Number of Merkle checkpoints examined.
    pub roots_checked: u64,
}
