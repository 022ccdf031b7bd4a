//! Domain model types for 6-3-5 brainwriting sessions
//!
//! Shared between the coordinator core, the persistence layer, and the
//! HTTP surface. All types serialize to the JSON shapes the web client
//! consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Number of brainwriting rounds in a full session
pub const ROUND_COUNT: u8 = 6;

/// Maximum participant slots per session
pub const MAX_PARTICIPANTS: usize = 6;

/// Ideas each participant contributes per round
pub const IDEAS_PER_BATCH: usize = 3;

/// Points each participant allocates per voting phase
pub const VOTE_POINTS: u32 = 3;

/// Participant kind: a person at a keyboard or an AI surrogate the
/// session owner drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    Human,
    AiSurrogate,
}

/// A session participant. Identity is the opaque `id` handle, never the
/// display name; a reloaded client re-attaches by presenting the handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub display_name: String,
    pub kind: ParticipantKind,
    /// Exactly one owner per session (the first human joiner)
    pub is_owner: bool,
    pub joined_at: DateTime<Utc>,
    pub connected: bool,
}

/// Session lifecycle state for the brainwriting step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Round 0: participants may still join
    Lobby,
    /// Rounds 1..=6 in progress
    InRound { round: u8 },
    /// All six rounds completed
    Finished,
    /// Owner skipped brainwriting; session carries no ideas
    Skipped,
}

impl SessionPhase {
    /// Current round number (0 while in the lobby or skipped, 6 when finished)
    pub fn round(&self) -> u8 {
        match self {
            SessionPhase::Lobby | SessionPhase::Skipped => 0,
            SessionPhase::InRound { round } => *round,
            SessionPhase::Finished => ROUND_COUNT,
        }
    }
}

/// The three ideas a participant submits into one (sheet, round) slot.
/// Immutable once written; a slot holds exactly 0 or 3 ideas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaBatch {
    pub author: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub ideas: [String; IDEAS_PER_BATCH],
}

/// Flattened read model of a single idea with its stable identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idea {
    /// Stable id `s{sheet}r{round}n{position}`
    pub id: String,
    pub sheet_index: usize,
    pub round: u8,
    /// Position within the batch, 1..=3
    pub position: u8,
    pub author: Uuid,
    pub text: String,
}

/// Compose the stable idea identifier for (sheet, round, position)
pub fn idea_id(sheet_index: usize, round: u8, position: u8) -> String {
    format!("s{}r{}n{}", sheet_index, round, position)
}

/// Three-level label applied to clusters and assessed ideas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelLabel {
    Low,
    Medium,
    High,
}

/// A semantic grouping of ideas produced after brainwriting finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Stable id `c1..ck` in builder output order
    pub id: String,
    pub name: String,
    pub description: String,
    pub member_idea_ids: Vec<String>,
    pub business_impact: LevelLabel,
    pub implementation_effort: LevelLabel,
    pub maturity_appropriateness: LevelLabel,
    pub impact_rationale: String,
    pub maturity_rationale: String,
    /// True when the deterministic substitute produced this cluster
    /// instead of the semantic grouping source
    #[serde(default)]
    pub fallback: bool,
}

/// Impact/effort labels for one idea of the selected cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaLabel {
    pub idea_id: String,
    pub business_impact: LevelLabel,
    pub implementation_effort: LevelLabel,
    pub impact_rationale: String,
}

/// Voting phase: clusters first, then ideas within the selected cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotePhase {
    Cluster,
    Idea,
}

impl VotePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            VotePhase::Cluster => "cluster",
            VotePhase::Idea => "idea",
        }
    }
}

/// One participant's 3-point allocation for a phase.
/// Keys are target ids (cluster ids or idea ids), values are points ≥ 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteAllocation {
    pub participant: Uuid,
    pub points: BTreeMap<String, u32>,
}

/// One row of a tallied ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub target_id: String,
    pub total_points: u32,
    /// 1-based rank; ties share a rank
    pub rank: u32,
}

/// Tally result for a voting phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ranking {
    pub entries: Vec<RankEntry>,
    /// All targets tied for rank 1; the caller selects among them
    pub top: Vec<String>,
    /// Number of allocations tallied
    pub ballots: usize,
}

/// Per-participant view inside a status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantStatus {
    pub id: Uuid,
    pub display_name: String,
    pub kind: ParticipantKind,
    pub is_owner: bool,
    pub connected: bool,
    /// Whether this participant has submitted for the current round
    pub submitted: bool,
    /// Sheet currently held (None while in the lobby)
    pub held_sheet: Option<usize>,
}

/// Point-in-time view of a session, sufficient together with the event
/// stream to reconstruct coordinator state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Consultation workflow step 1..=6 (brainwriting is step 2)
    pub step: u8,
    /// Carries the round number while a round is open
    #[serde(flatten)]
    pub phase: SessionPhase,
    pub participants: Vec<ParticipantStatus>,
    pub all_submitted: bool,
    pub idea_count: usize,
    pub clusters_ready: bool,
    pub selected_cluster: Option<String>,
    pub cluster_ballots: usize,
    pub idea_ballots: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idea_id_format() {
        assert_eq!(idea_id(0, 1, 1), "s0r1n1");
        assert_eq!(idea_id(5, 6, 3), "s5r6n3");
    }

    #[test]
    fn test_session_phase_round() {
        assert_eq!(SessionPhase::Lobby.round(), 0);
        assert_eq!(SessionPhase::InRound { round: 4 }.round(), 4);
        assert_eq!(SessionPhase::Finished.round(), ROUND_COUNT);
        assert_eq!(SessionPhase::Skipped.round(), 0);
    }

    #[test]
    fn test_session_phase_serialization() {
        let json = serde_json::to_string(&SessionPhase::InRound { round: 2 }).unwrap();
        assert_eq!(json, r#"{"state":"in_round","round":2}"#);

        let back: SessionPhase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SessionPhase::InRound { round: 2 });
    }

    #[test]
    fn test_level_label_lowercase() {
        assert_eq!(serde_json::to_string(&LevelLabel::Medium).unwrap(), r#""medium""#);
        let l: LevelLabel = serde_json::from_str(r#""high""#).unwrap();
        assert_eq!(l, LevelLabel::High);
    }
}
