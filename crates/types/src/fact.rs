//! The primary stored record.
//!
//! A [`Fact`] is a typed, tenant-scoped text record with tags, a confidence
//! label, a consensus score and bitemporal validity bounds. Facts are never
//! physically deleted: deprecation closes the validity interval by setting
//! `valid_until`, and every mutation appends exactly one ledger transaction.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// The enumerated kind of a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    /// General knowledge statement.
    Knowledge,
    /// A decision that was taken.
    Decision,
    /// An observed error or failure.
    Error,
    /// A rule to follow.
    Rule,
    /// An axiom: assumed true, highest session priority.
    Axiom,
    /// A schema or structural description.
    Schema,
    /// An idea or proposal.
    Idea,
    /// An unresolved reference to something not yet known.
    Ghost,
    /// A fact bridging projects within a tenant.
    Bridge,
    /// A reflective observation produced by an agent about itself.
    Reflection,
    /// A distilled lesson from past behaviour.
    MetaLearning,
    /// A stated intention.
    Intent,
}

impl FactType {
    /// All accepted fact types, in session-priority order.
    pub const ALL: &'static [FactType] = &[
        FactType::Axiom,
        FactType::Decision,
        FactType::Rule,
        FactType::Error,
        FactType::Knowledge,
        FactType::Ghost,
        FactType::Intent,
        FactType::Schema,
        FactType::Idea,
        FactType::Bridge,
        FactType::Reflection,
        FactType::MetaLearning,
    ];

    /// The canonical lowercase string form persisted in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::Knowledge => "knowledge",
            FactType::Decision => "decision",
            FactType::Error => "error",
            FactType::Rule => "rule",
            FactType::Axiom => "axiom",
            FactType::Schema => "schema",
            FactType::Idea => "idea",
            FactType::Ghost => "ghost",
            FactType::Bridge => "bridge",
            FactType::Reflection => "reflection",
            FactType::MetaLearning => "meta_learning",
            FactType::Intent => "intent",
        }
    }
}

impl fmt::Display for FactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "knowledge" => Ok(FactType::Knowledge),
            "decision" => Ok(FactType::Decision),
            "error" => Ok(FactType::Error),
            "rule" => Ok(FactType::Rule),
            "axiom" => Ok(FactType::Axiom),
            "schema" => Ok(FactType::Schema),
            "idea" => Ok(FactType::Idea),
            "ghost" => Ok(FactType::Ghost),
            "bridge" => Ok(FactType::Bridge),
            "reflection" => Ok(FactType::Reflection),
            "meta_learning" => Ok(FactType::MetaLearning),
            "intent" => Ok(FactType::Intent),
            other => Err(ValidationError::UnknownFactType(other.to_string())),
        }
    }
}

/// The confidence label attached to a fact.
///
/// `Stated` is the default on insert. The consensus engine flips facts to
/// `Verified` or `Disputed` when the consensus score crosses its thresholds.
/// The `C1`..`C5` ladder is an agent-assigned certainty scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Asserted by a source without independent verification.
    Stated,
    /// Derived by inference rather than observation.
    Inferred,
    /// Consensus-confirmed (score above the verified threshold).
    Verified,
    /// Consensus-contested (score below the disputed threshold).
    Disputed,
    /// Certainty ladder, weakest.
    C1,
    /// Certainty ladder.
    C2,
    /// Certainty ladder.
    C3,
    /// Certainty ladder.
    C4,
    /// Certainty ladder, strongest.
    C5,
}

impl Confidence {
    /// The canonical string form persisted in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Stated => "stated",
            Confidence::Inferred => "inferred",
            Confidence::Verified => "verified",
            Confidence::Disputed => "disputed",
            Confidence::C1 => "C1",
            Confidence::C2 => "C2",
            Confidence::C3 => "C3",
            Confidence::C4 => "C4",
            Confidence::C5 => "C5",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stated" => Ok(Confidence::Stated),
            "inferred" => Ok(Confidence::Inferred),
            "verified" => Ok(Confidence::Verified),
            "disputed" => Ok(Confidence::Disputed),
            "C1" => Ok(Confidence::C1),
            "C2" => Ok(Confidence::C2),
            "C3" => Ok(Confidence::C3),
            "C4" => Ok(Confidence::C4),
            "C5" => Ok(Confidence::C5),
            other => Err(ValidationError::UnknownConfidence(other.to_string())),
        }
    }
}

/// Opaque key-value metadata attached to a fact. Encrypted at rest alongside
/// the content when it crosses the encryption threshold.
pub type FactMeta = BTreeMap<String, Value>;

/// A fully decoded fact row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// Monotonically-assigned row id.
    pub id: i64,
    /// Isolation boundary; every read and write is scoped by this.
    pub tenant_id: String,
    /// Free-form namespace within the tenant.
    pub project: String,
    /// The decrypted content text.
    pub content: String,
    /// The kind of this fact.
    pub fact_type: FactType,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Confidence label.
    pub confidence: Confidence,
    /// Start of the validity interval (ISO-8601 UTC).
    pub valid_from: String,
    /// End of the validity interval; `None` means currently active.
    pub valid_until: Option<String>,
    /// Where the fact came from (free-form).
    pub source: Option<String>,
    /// Decrypted opaque metadata.
    pub meta: FactMeta,
    /// Reputation-weighted consensus score; 1.0 at insert.
    pub consensus_score: f64,
    /// Insertion timestamp (ISO-8601 UTC).
    pub created_at: String,
    /// Last mutation timestamp (ISO-8601 UTC).
    pub updated_at: String,
    /// The ledger transaction that created this row.
    pub tx_id: Option<i64>,
    /// The hash of that ledger transaction, when joined in.
    pub hash: Option<String>,
}

impl Fact {
    /// A fact is active iff its validity interval is still open.
    pub fn is_active(&self) -> bool {
        self.valid_until.is_none()
    }

    /// The previous version of this fact, when it was created by `update`.
    pub fn previous_fact_id(&self) -> Option<i64> {
        self.meta.get("previous_fact_id").and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_type_round_trips() {
        for ft in FactType::ALL {
            assert_eq!(ft.as_str().parse::<FactType>().unwrap(), *ft);
        }
    }

    #[test]
    fn unknown_fact_type_rejected() {
        assert!("telepathy".parse::<FactType>().is_err());
    }

    #[test]
    fn confidence_ladder_round_trips() {
        for c in ["stated", "inferred", "verified", "disputed", "C1", "C5"] {
            assert_eq!(c.parse::<Confidence>().unwrap().as_str(), c);
        }
    }
}
