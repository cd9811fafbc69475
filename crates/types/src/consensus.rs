//! Voting identities, votes and outcomes.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A registered voting identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Agent row id.
    pub id: i64,
    /// Display name, unique per deployment.
    pub name: String,
    /// Free-form kind (`ai`, `human`, `daemon`, ...).
    pub agent_type: String,
    /// Non-negative reputation used to weight votes.
    pub reputation_score: f64,
    /// Optional public key for signed votes.
    pub public_key: Option<String>,
    /// Registration timestamp (ISO-8601 UTC).
    pub created_at: String,
}

/// The direction of a vote. Value `0` retracts a previous vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum VoteValue {
    /// Dispute the fact.
    Down,
    /// Retract any existing vote by this agent on this fact.
    Retract,
    /// Verify the fact.
    Up,
}

impl VoteValue {
    /// The signed integer persisted and summed.
    pub fn as_i8(self) -> i8 {
        match self {
            VoteValue::Down => -1,
            VoteValue::Retract => 0,
            VoteValue::Up => 1,
        }
    }
}

impl TryFrom<i8> for VoteValue {
    type Error = ValidationError;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(VoteValue::Down),
            0 => Ok(VoteValue::Retract),
            1 => Ok(VoteValue::Up),
            other => Err(ValidationError::InvalidVoteValue(other)),
        }
    }
}

impl From<VoteValue> for i8 {
    fn from(v: VoteValue) -> i8 {
        v.as_i8()
    }
}

/// A reputation-weighted vote row. `(fact_id, agent_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    /// The fact voted on.
    pub fact_id: i64,
    /// The voting agent.
    pub agent_id: i64,
    /// Direction, -1 or +1 (retractions delete the row instead).
    pub value: i8,
    /// `sign(value) * reputation` at vote time.
    pub vote_weight: f64,
    /// Snapshot of the agent's reputation when the vote was cast.
    pub agent_rep_at_vote: f64,
    /// Vote timestamp (ISO-8601 UTC).
    pub created_at: String,
}

/// The result of applying a vote: the recomputed score and tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteReceipt {
    /// The fact voted on.
    pub fact_id: i64,
    /// New consensus score after recompute.
    pub new_consensus_score: f64,
    /// New confidence label, when the score crossed a tier threshold.
    pub new_confidence: Option<String>,
    /// The ledger transaction recording the vote.
    pub tx_id: i64,
}

/// How a fact fared against later real-world verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Not yet resolved.
    Pending,
    /// The fact held up.
    Confirmed,
    /// The fact was refuted.
    Refuted,
}

impl OutcomeStatus {
    /// Canonical string form persisted in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Pending => "pending",
            OutcomeStatus::Confirmed => "confirmed",
            OutcomeStatus::Refuted => "refuted",
        }
    }
}

/// An outcome record tying a fact to its later verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// Outcome row id.
    pub id: i64,
    /// The fact being tracked.
    pub fact_id: i64,
    /// Current resolution status.
    pub status: OutcomeStatus,
    /// Free-form resolution note.
    pub detail: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Resolution timestamp, once resolved.
    pub resolved_at: Option<String>,
}
