//! Event types and EventBus for the workshop coordinator
//!
//! Every successful state transition publishes exactly one event. Events
//! carry a per-session sequence number assigned under the session's
//! critical section: sequence numbers start at 1 and never skip, so a
//! subscriber that deduplicates by `seq` reads a gap-free prefix.

use crate::model::ParticipantKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Domain events published by the session coordinator
///
/// Serialized with an adjacent `type` discriminator so SSE clients can
/// dispatch without deserializing the full payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkshopEvent {
    /// A participant joined the lobby
    ParticipantJoined {
        participant: Uuid,
        display_name: String,
        kind: ParticipantKind,
        is_owner: bool,
    },

    /// A participant disconnected (registry entry is retained)
    ParticipantLeft { participant: Uuid },

    /// Consultation workflow step changed
    StepChanged { step: u8 },

    /// Brainwriting started; round 1 open, registry frozen
    SessionStarted { participant_count: usize },

    /// A participant submitted their three ideas for a round
    IdeasSubmitted {
        participant: Uuid,
        round: u8,
        sheet: usize,
    },

    /// All sheets rotated; a new round is open
    RoundAdvanced { new_round: u8, forced: bool },

    /// Round 6 closed; brainwriting finished
    SessionComplete { idea_count: usize },

    /// Owner skipped brainwriting; the session carries no ideas
    SessionSkipped,

    /// Clusters materialized (primary source or deterministic fallback)
    ClustersReady {
        cluster_count: usize,
        fallback: bool,
    },

    /// Owner pinned a cluster for Phase-2 voting
    ClusterSelected { cluster_id: String },

    /// Ideas of the selected cluster were labelled
    IdeasAssessed { cluster_id: String },

    /// A participant's cluster-phase allocation was recorded
    ClusterVoteRecorded { participant: Uuid },

    /// Every human participant has voted in the cluster phase
    ClusterResultsReady,

    /// A participant's idea-phase allocation was recorded
    IdeaVoteRecorded { participant: Uuid },

    /// Every human participant has voted in the idea phase
    IdeaResultsReady,
}

impl WorkshopEvent {
    /// Get event type as string for SSE event names and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkshopEvent::ParticipantJoined { .. } => "participant_joined",
            WorkshopEvent::ParticipantLeft { .. } => "participant_left",
            WorkshopEvent::StepChanged { .. } => "step_changed",
            WorkshopEvent::SessionStarted { .. } => "session_started",
            WorkshopEvent::IdeasSubmitted { .. } => "ideas_submitted",
            WorkshopEvent::RoundAdvanced { .. } => "round_advanced",
            WorkshopEvent::SessionComplete { .. } => "session_complete",
            WorkshopEvent::SessionSkipped => "session_skipped",
            WorkshopEvent::ClustersReady { .. } => "clusters_ready",
            WorkshopEvent::ClusterSelected { .. } => "cluster_selected",
            WorkshopEvent::IdeasAssessed { .. } => "ideas_assessed",
            WorkshopEvent::ClusterVoteRecorded { .. } => "cluster_vote_recorded",
            WorkshopEvent::ClusterResultsReady => "cluster_results_ready",
            WorkshopEvent::IdeaVoteRecorded { .. } => "idea_vote_recorded",
            WorkshopEvent::IdeaResultsReady => "idea_results_ready",
        }
    }
}

/// Wire envelope: every published event carries the session handle, its
/// per-session sequence number, and the server timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: Uuid,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: WorkshopEvent,
}

/// Central event distribution bus
///
/// Built on `tokio::sync::broadcast`: non-blocking publish, multiple
/// concurrent subscribers, automatic cleanup when receivers drop. Slow
/// subscribers lag rather than block publishers; the persisted event log
/// lets them catch up via `since(seq)` replay.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events (all sessions; filter by
    /// `envelope.session_id` at the consumer)
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Emit an envelope, ignoring the no-subscriber case. Delivery to
    /// live subscribers is best-effort; the event log is the durable
    /// record.
    pub fn emit_lossy(&self, envelope: EventEnvelope) {
        let _ = self.tx.send(envelope);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
