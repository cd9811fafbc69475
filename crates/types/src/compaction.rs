//! Compaction strategies and run results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Available compaction strategies, applied in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    /// Exact + near-duplicate detection; the oldest of each group survives.
    Dedup,
    /// Consolidate repeated error facts into one canonical record.
    MergeErrors,
    /// Deprecate old, low-consensus facts.
    StalenessPrune,
}

impl CompactionStrategy {
    /// All strategies, in application order.
    pub const ALL: &'static [CompactionStrategy] = &[
        CompactionStrategy::Dedup,
        CompactionStrategy::MergeErrors,
        CompactionStrategy::StalenessPrune,
    ];

    /// Canonical snake_case string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionStrategy::Dedup => "dedup",
            CompactionStrategy::MergeErrors => "merge_errors",
            CompactionStrategy::StalenessPrune => "staleness_prune",
        }
    }
}

impl fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompactionStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dedup" => Ok(CompactionStrategy::Dedup),
            "merge_errors" => Ok(CompactionStrategy::MergeErrors),
            "staleness_prune" => Ok(CompactionStrategy::StalenessPrune),
            other => Err(ValidationError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Tuning knobs for a compaction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionOptions {
    /// Strategies to apply; `None` means all.
    pub strategies: Option<Vec<CompactionStrategy>>,
    /// When true, report what would change without mutating anything.
    pub dry_run: bool,
    /// Near-duplicate similarity threshold in `[0, 1]`.
    pub similarity_threshold: f64,
    /// Staleness age bound in days.
    pub max_age_days: u32,
    /// Staleness consensus bound; facts below it are prune candidates.
    pub min_consensus: f64,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        CompactionOptions {
            strategies: None,
            dry_run: false,
            similarity_threshold: 0.85,
            max_age_days: 90,
            min_consensus: 0.5,
        }
    }
}

/// Outcome of a compaction run. Everything "removed" was deprecated,
/// never deleted; `history` and `time_travel` still reach it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionResult {
    /// The project compacted.
    pub project: String,
    /// Strategies that actually changed something.
    pub strategies_applied: Vec<String>,
    /// Active fact count before the run.
    pub original_count: u64,
    /// Active fact count after the run.
    pub compacted_count: u64,
    /// Facts deprecated by the run.
    pub deprecated_ids: Vec<i64>,
    /// Consolidated facts created by the run.
    pub new_fact_ids: Vec<i64>,
    /// True when no mutation was committed.
    pub dry_run: bool,
    /// Human-readable per-strategy summaries.
    pub details: Vec<String>,
}

impl CompactionResult {
    /// How many active facts the run removed.
    pub fn reduction(&self) -> u64 {
        self.original_count.saturating_sub(self.compacted_count)
    }
}
