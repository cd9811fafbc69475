//! Core error types for CORTEX.
//!
//! Expected failures are values, not panics: every fallible core method
//! returns a `Result` carrying one of these enums. Background tasks never
//! surface their errors to user calls; they log and continue.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Caller-supplied input was invalid.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The project namespace was empty or whitespace.
    #[error("project cannot be empty")]
    EmptyProject,
    /// The project namespace exceeded the maximum length.
    #[error("project too long ({len} chars, max {max})")]
    ProjectTooLong {
        /// Supplied length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// Content was shorter than the configured minimum after trimming.
    #[error("content too short ({len} chars, min {min})")]
    ContentTooShort {
        /// Trimmed length.
        len: usize,
        /// Required minimum.
        min: usize,
    },
    /// The fact type is not in the enumerated set.
    #[error("unknown fact type: {0}")]
    UnknownFactType(String),
    /// The confidence label is not in the enumerated set.
    #[error("unknown confidence: {0}")]
    UnknownConfidence(String),
    /// The role name is not in the enumerated set.
    #[error("unknown role: {0}")]
    UnknownRole(String),
    /// The compaction strategy name is unknown.
    #[error("unknown compaction strategy: {0}")]
    UnknownStrategy(String),
    /// A vote value outside {-1, 0, 1}.
    #[error("vote value must be -1, 0 or 1 (got {0})")]
    InvalidVoteValue(i8),
    /// A timestamp string that does not parse as ISO-8601.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// A referenced fact does not exist or is not visible to the tenant.
    #[error("fact {0} not found")]
    FactNotFound(i64),
    /// A referenced agent does not exist.
    #[error("agent {0} not found")]
    AgentNotFound(i64),
    /// A batch input was empty or structurally malformed.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
}

impl ErrorCode for ValidationError {
    fn code(&self) -> &'static str {
        match self {
            Self::EmptyProject => "VALIDATION_EMPTY_PROJECT",
            Self::ProjectTooLong { .. } => "VALIDATION_PROJECT_TOO_LONG",
            Self::ContentTooShort { .. } => "VALIDATION_CONTENT_TOO_SHORT",
            Self::UnknownFactType(_) => "VALIDATION_UNKNOWN_FACT_TYPE",
            Self::UnknownConfidence(_) => "VALIDATION_UNKNOWN_CONFIDENCE",
            Self::UnknownRole(_) => "VALIDATION_UNKNOWN_ROLE",
            Self::UnknownStrategy(_) => "VALIDATION_UNKNOWN_STRATEGY",
            Self::InvalidVoteValue(_) => "VALIDATION_INVALID_VOTE",
            Self::InvalidTimestamp(_) => "VALIDATION_INVALID_TIMESTAMP",
            Self::FactNotFound(_) => "VALIDATION_FACT_NOT_FOUND",
            Self::AgentNotFound(_) => "VALIDATION_AGENT_NOT_FOUND",
            Self::InvalidBatch(_) => "VALIDATION_INVALID_BATCH",
        }
    }
}

/// Errors from the storage substrate.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying database returned an error.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// The database stayed locked past the busy timeout.
    #[error("database lock timeout: {0}")]
    LockTimeout(String),
    /// A write was submitted while the writer is not running.
    #[error("write worker is not running")]
    WriterNotRunning,
    /// The writer shut down before the operation completed.
    #[error("write worker shut down before the operation completed")]
    WriterShutdown,
    /// A constraint violation that is not a dedup no-op.
    #[error("constraint violation: {0}")]
    Constraint(String),
    /// A migration failed; the transaction was rolled back.
    #[error("migration {version} failed: {reason}")]
    MigrationFailed {
        /// The migration version that failed.
        version: u32,
        /// Why it failed.
        reason: String,
    },
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::LockTimeout(_) => "STORAGE_LOCK_TIMEOUT",
            Self::WriterNotRunning => "STORAGE_WRITER_NOT_RUNNING",
            Self::WriterShutdown => "STORAGE_WRITER_SHUTDOWN",
            Self::Constraint(_) => "STORAGE_CONSTRAINT",
            Self::MigrationFailed { .. } => "STORAGE_MIGRATION_FAILED",
        }
    }
}

/// Errors from canonicalization, hashing and envelope encryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// No master key is configured and the payload requires encryption.
    #[error("master key missing: refusing plaintext persistence of sensitive content")]
    MasterKeyMissing,
    /// The configured master key is not valid base64 of 32 bytes.
    #[error("invalid master key: {0}")]
    InvalidMasterKey(String),
    /// An envelope could not be sealed.
    #[error("encryption failed: {0}")]
    Encrypt(String),
    /// An envelope could not be opened (corrupt or wrong tenant key).
    #[error("decryption failed: {0}")]
    Decrypt(String),
    /// A value could not be canonicalized.
    #[error("canonicalization failed: {0}")]
    Canonical(String),
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::MasterKeyMissing => "CRYPTO_MASTER_KEY_MISSING",
            Self::InvalidMasterKey(_) => "CRYPTO_INVALID_MASTER_KEY",
            Self::Encrypt(_) => "CRYPTO_ENCRYPT_FAILED",
            Self::Decrypt(_) => "CRYPTO_DECRYPT_FAILED",
            Self::Canonical(_) => "CRYPTO_CANONICAL_FAILED",
        }
    }
}

/// Errors from the ledger and its verification machinery.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The append could not be persisted.
    #[error("ledger append failed: {0}")]
    Append(String),
    /// A checkpoint could not be created.
    #[error("checkpoint failed: {0}")]
    Checkpoint(String),
    /// A verification run itself failed (distinct from finding violations).
    #[error("integrity verification failed to run: {0}")]
    Verification(String),
}

impl ErrorCode for LedgerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Append(_) => "LEDGER_APPEND_FAILED",
            Self::Checkpoint(_) => "LEDGER_CHECKPOINT_FAILED",
            Self::Verification(_) => "LEDGER_VERIFICATION_FAILED",
        }
    }
}

/// Errors from authentication and authorization.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The candidate key did not match the `ctx_` wire format.
    #[error("invalid key format")]
    InvalidKeyFormat,
    /// No active key row matched the hash.
    #[error("invalid or revoked key")]
    InvalidKey,
    /// Authenticated, but the role lacks the required permission.
    #[error("permission denied: role '{role}' lacks {permission}")]
    PermissionDenied {
        /// The authenticated role.
        role: String,
        /// The permission that was required.
        permission: String,
    },
    /// The sovereign gate's consensus requirement was not met.
    #[error("sovereign gate denied: claim score {score} below required {required}")]
    GateConsensus {
        /// The claim's consensus score.
        score: f64,
        /// The configured minimum.
        required: f64,
    },
    /// The key's rate budget is exhausted for the current window.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window frees capacity.
        retry_after_secs: u64,
    },
    /// The auth backend failed.
    #[error("auth backend error: {0}")]
    Backend(String),
}

impl ErrorCode for AuthError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidKeyFormat => "AUTH_INVALID_FORMAT",
            Self::InvalidKey => "AUTH_INVALID_KEY",
            Self::PermissionDenied { .. } => "AUTH_PERMISSION_DENIED",
            Self::GateConsensus { .. } => "AUTH_GATE_CONSENSUS",
            Self::RateLimited { .. } => "AUTH_RATE_LIMITED",
            Self::Backend(_) => "AUTH_BACKEND_ERROR",
        }
    }
}

/// Errors from the consensus engine.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The vote could not be recorded.
    #[error("vote failed: {0}")]
    Vote(String),
    /// The score recompute failed.
    #[error("score recompute failed: {0}")]
    Recompute(String),
}

impl ErrorCode for ConsensusError {
    fn code(&self) -> &'static str {
        match self {
            Self::Vote(_) => "CONSENSUS_VOTE_FAILED",
            Self::Recompute(_) => "CONSENSUS_RECOMPUTE_FAILED",
        }
    }
}

/// Errors from the compaction engine.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// Contradictory strategies or inconsistent state discovered mid-run.
    #[error("compaction conflict: {0}")]
    Conflict(String),
    /// A strategy failed to complete.
    #[error("compaction strategy '{strategy}' failed: {reason}")]
    Strategy {
        /// The failing strategy.
        strategy: String,
        /// Why it failed.
        reason: String,
    },
}

impl ErrorCode for CompactionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "COMPACTION_CONFLICT",
            Self::Strategy { .. } => "COMPACTION_STRATEGY_FAILED",
        }
    }
}

/// Errors from the retrieval engine.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The embedding provider failed. Retrieval degrades to lexical.
    #[error("embedding failed: {0}")]
    Embedding(String),
    /// Both arms failed; nothing could be returned.
    #[error("search failed: {0}")]
    Search(String),
    /// An embedding's dimension does not match the index's.
    #[error("embedding dimension mismatch: got {got}, index expects {expected}")]
    DimensionMismatch {
        /// Dimension of the offending vector.
        got: usize,
        /// Dimension the index was built with.
        expected: usize,
    },
}

impl ErrorCode for RetrievalError {
    fn code(&self) -> &'static str {
        match self {
            Self::Embedding(_) => "RETRIEVAL_EMBEDDING_FAILED",
            Self::Search(_) => "RETRIEVAL_SEARCH_FAILED",
            Self::DimensionMismatch { .. } => "RETRIEVAL_DIMENSION_MISMATCH",
        }
    }
}

/// A retryable background failure that never propagates to user calls.
#[derive(Debug, Error)]
#[error("transient: {0}")]
pub struct TransientError(pub String);

impl ErrorCode for TransientError {
    fn code(&self) -> &'static str {
        "TRANSIENT"
    }
}

/// The unified top-level error for the embedded engine surface.
#[derive(Debug, Error)]
pub enum CoreError {
    /// See [`ValidationError`].
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// See [`StorageError`].
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// See [`CryptoError`].
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// See [`LedgerError`].
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// See [`AuthError`].
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// See [`ConsensusError`].
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    /// See [`CompactionError`].
    #[error(transparent)]
    Compaction(#[from] CompactionError),
    /// See [`RetrievalError`].
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// See [`TransientError`].
    #[error(transparent)]
    Transient(#[from] TransientError),
}

impl ErrorCode for CoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.code(),
            Self::Storage(e) => e.code(),
            Self::Crypto(e) => e.code(),
            Self::Ledger(e) => e.code(),
            Self::Auth(e) => e.code(),
            Self::Consensus(e) => e.code(),
            Self::Compaction(e) => e.code(),
            Self::Retrieval(e) => e.code(),
            Self::Transient(e) => e.code(),
        }
    }
}

impl CoreError {
    /// The process exit code for this error when CORTEX is embedded in a
    /// command-line host: 1 validation, 2 storage/integrity, 3 auth.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 1,
            Self::Auth(_) => 3,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ValidationError::EmptyProject.code(), "VALIDATION_EMPTY_PROJECT");
        assert_eq!(StorageError::WriterNotRunning.code(), "STORAGE_WRITER_NOT_RUNNING");
        assert_eq!(CryptoError::MasterKeyMissing.code(), "CRYPTO_MASTER_KEY_MISSING");
    }

    #[test]
    fn exit_codes_follow_taxonomy() {
        let v: CoreError = ValidationError::EmptyProject.into();
        let s: CoreError = StorageError::WriterNotRunning.into();
        let a: CoreError = AuthError::InvalidKey.into();
        assert_eq!(v.exit_code(), 1);
        assert_eq!(s.exit_code(), 2);
        assert_eq!(a.exit_code(), 3);
    }
}
