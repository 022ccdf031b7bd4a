//! Session state aggregate and the 6-3-5 round state machine
//!
//! `SessionState` is the authoritative in-memory record of one workshop
//! session. All access goes through the coordinator's per-session
//! critical section. Mutating operations are split into a fallible
//! `validate_*` step (no side effects) and an infallible `apply_*`
//! step, so persistence can run between the two and a failed write
//! leaves memory untouched.

use chrono::{DateTime, Utc};
use ideaforge_common::events::{EventEnvelope, WorkshopEvent};
use ideaforge_common::model::{
    idea_id, Cluster, Idea, IdeaBatch, IdeaLabel, Participant, ParticipantKind,
    ParticipantStatus, Ranking, SessionPhase, SessionStatus, VoteAllocation, VotePhase,
    IDEAS_PER_BATCH, MAX_PARTICIPANTS, ROUND_COUNT,
};
use ideaforge_common::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use uuid::Uuid;

use super::{sheets, votes};

/// Consultation workflow step hosting the brainwriting phase
pub const BRAINWRITING_STEP: u8 = 2;

/// Authoritative state of one session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: Uuid,
    pub owner_token: Uuid,
    pub created_at: DateTime<Utc>,
    pub step: u8,
    pub phase: SessionPhase,
    pub company_context: Option<String>,
    /// Join order is significant: participant index i created sheet i
    pub participants: Vec<Participant>,
    /// Participants who have submitted for the current round
    pub submitted: HashSet<Uuid>,
    /// Append-only idea store keyed by (sheet index, round)
    pub ideas: BTreeMap<(usize, u8), IdeaBatch>,
    pub clusters: Vec<Cluster>,
    pub selected_cluster: Option<String>,
    /// Labels for ideas of the assessed cluster, keyed by idea id
    pub idea_labels: BTreeMap<String, IdeaLabel>,
    /// Which cluster the cached labels belong to
    pub assessed_cluster: Option<String>,
    pub cluster_votes: BTreeMap<Uuid, VoteAllocation>,
    pub idea_votes: BTreeMap<Uuid, VoteAllocation>,
    /// Ordered event log; `seq` of the first entry is 1
    pub events: Vec<EventEnvelope>,
    pub next_seq: u64,
}

/// Planned outcome of a validated submission
#[derive(Debug)]
pub struct SubmitPlan {
    pub sheet: usize,
    pub round: u8,
    pub batch: IdeaBatch,
}

/// Planned outcome of a validated round advance
pub struct AdvancePlan {
    pub next: SessionPhase,
}

/// Rich point-in-time view served as the SSE snapshot: together with
/// the subsequent event stream it reconstructs coordinator state
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub ideas: Vec<Idea>,
    pub clusters: Vec<Cluster>,
    pub idea_labels: Vec<IdeaLabel>,
    pub cluster_ranking: Option<Ranking>,
    pub idea_ranking: Option<Ranking>,
    /// Sequence number of the last published event (0 if none)
    pub last_seq: u64,
}

impl SessionState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_token: Uuid::new_v4(),
            created_at: now,
            step: 1,
            phase: SessionPhase::Lobby,
            company_context: None,
            participants: Vec::new(),
            submitted: HashSet::new(),
            ideas: BTreeMap::new(),
            clusters: Vec::new(),
            selected_cluster: None,
            idea_labels: BTreeMap::new(),
            assessed_cluster: None,
            cluster_votes: BTreeMap::new(),
            idea_votes: BTreeMap::new(),
            events: Vec::new(),
            next_seq: 1,
        }
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    pub fn participant(&self, id: Uuid) -> Result<&Participant> {
        self.participants
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::Missing(format!("unknown participant {}", id)))
    }

    fn participant_mut(&mut self, id: Uuid) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn participant_index(&self, id: Uuid) -> Result<usize> {
        self.participants
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| Error::Missing(format!("unknown participant {}", id)))
    }

    pub fn validate_join(&self, display_name: &str) -> Result<()> {
        if self.phase != SessionPhase::Lobby {
            return Err(Error::PreconditionFailed(
                "session already started; joining is closed".into(),
            ));
        }
        if self.participants.len() >= MAX_PARTICIPANTS {
            return Err(Error::PreconditionFailed(format!(
                "session is full ({} slots)",
                MAX_PARTICIPANTS
            )));
        }
        let name = display_name.trim();
        if name.is_empty() {
            return Err(Error::Invalid("display name must not be empty".into()));
        }
        if self
            .participants
            .iter()
            .any(|p| p.display_name.eq_ignore_ascii_case(name))
        {
            return Err(Error::PreconditionFailed(format!(
                "display name {:?} is already taken",
                name
            )));
        }
        Ok(())
    }

    /// Build the participant record a successful join will insert.
    /// The first human joiner becomes the owner.
    pub fn plan_join(
        &self,
        display_name: &str,
        kind: ParticipantKind,
        now: DateTime<Utc>,
    ) -> Participant {
        let is_owner = kind == ParticipantKind::Human
            && !self.participants.iter().any(|p| p.is_owner);
        Participant {
            id: Uuid::new_v4(),
            display_name: display_name.trim().to_string(),
            kind,
            is_owner,
            joined_at: now,
            connected: true,
        }
    }

    pub fn apply_join(&mut self, participant: Participant) {
        self.participants.push(participant);
    }

    /// Mark presence without touching the frozen registry
    pub fn apply_connected(&mut self, id: Uuid, connected: bool) {
        if let Some(p) = self.participant_mut(id) {
            p.connected = connected;
        }
    }

    // ------------------------------------------------------------------
    // Round state machine
    // ------------------------------------------------------------------

    pub fn validate_start(&self) -> Result<()> {
        if self.step != BRAINWRITING_STEP {
            return Err(Error::PreconditionFailed(format!(
                "brainwriting starts at step {}, session is at step {}",
                BRAINWRITING_STEP, self.step
            )));
        }
        if self.phase != SessionPhase::Lobby {
            return Err(Error::PreconditionFailed("session already started".into()));
        }
        if self.participants.is_empty() {
            return Err(Error::PreconditionFailed(
                "at least one participant is required to start".into(),
            ));
        }
        Ok(())
    }

    pub fn apply_start(&mut self) {
        self.phase = SessionPhase::InRound { round: 1 };
        self.submitted.clear();
    }

    pub fn validate_skip(&self) -> Result<()> {
        match self.phase {
            SessionPhase::Lobby | SessionPhase::InRound { .. } => Ok(()),
            SessionPhase::Finished | SessionPhase::Skipped => Err(Error::PreconditionFailed(
                "brainwriting already ended".into(),
            )),
        }
    }

    pub fn apply_skip(&mut self) {
        self.phase = SessionPhase::Skipped;
        self.submitted.clear();
    }

    pub fn current_round(&self) -> Result<u8> {
        match self.phase {
            SessionPhase::InRound { round } => Ok(round),
            _ => Err(Error::PreconditionFailed("no round in progress".into())),
        }
    }

    /// Sheet held by a participant in the current round
    pub fn held_sheet(&self, participant: Uuid) -> Result<usize> {
        let round = self.current_round()?;
        let index = self.participant_index(participant)?;
        Ok(sheets::sheet_held_by(index, round, self.participants.len()))
    }

    pub fn validate_submit(
        &self,
        participant: Uuid,
        ideas: &[String],
        now: DateTime<Utc>,
    ) -> Result<SubmitPlan> {
        let round = self.current_round()?;
        self.participant(participant)?;
        if self.submitted.contains(&participant) {
            return Err(Error::PreconditionFailed(format!(
                "already submitted for round {}",
                round
            )));
        }
        if ideas.len() != IDEAS_PER_BATCH {
            return Err(Error::Invalid(format!(
                "exactly {} ideas are required (got {})",
                IDEAS_PER_BATCH,
                ideas.len()
            )));
        }
        let mut cleaned: Vec<String> = Vec::with_capacity(IDEAS_PER_BATCH);
        for idea in ideas {
            let text = idea.trim();
            if text.is_empty() {
                return Err(Error::Invalid("ideas must not be empty".into()));
            }
            cleaned.push(text.to_string());
        }

        let sheet = self.held_sheet(participant)?;
        if self.ideas.contains_key(&(sheet, round)) {
            // The submitted-set check above makes this unreachable in a
            // single-writer world; reaching it is a bug.
            return Err(Error::Conflict(format!(
                "slot (sheet {}, round {}) already written",
                sheet, round
            )));
        }

        let batch = IdeaBatch {
            author: participant,
            submitted_at: now,
            ideas: match <[String; IDEAS_PER_BATCH]>::try_from(cleaned) {
                Ok(array) => array,
                Err(_) => unreachable!("length checked above"),
            },
        };

        Ok(SubmitPlan { sheet, round, batch })
    }

    pub fn apply_submit(&mut self, plan: SubmitPlan) {
        self.submitted.insert(plan.batch.author);
        self.ideas.insert((plan.sheet, plan.round), plan.batch);
    }

    pub fn all_submitted(&self) -> bool {
        self.participants
            .iter()
            .all(|p| self.submitted.contains(&p.id))
    }

    pub fn validate_advance(&self, force: bool) -> Result<AdvancePlan> {
        let round = self.current_round()?;
        if !force && !self.all_submitted() {
            let waiting = self
                .participants
                .iter()
                .filter(|p| !self.submitted.contains(&p.id))
                .count();
            return Err(Error::PreconditionFailed(format!(
                "round {} not ready: {} participant(s) have not submitted",
                round, waiting
            )));
        }
        let next = if round < ROUND_COUNT {
            SessionPhase::InRound { round: round + 1 }
        } else {
            SessionPhase::Finished
        };
        Ok(AdvancePlan { next })
    }

    pub fn apply_advance(&mut self, plan: AdvancePlan) {
        self.phase = plan.next;
        self.submitted.clear();
    }

    // ------------------------------------------------------------------
    // Step and context
    // ------------------------------------------------------------------

    pub fn validate_set_step(&self, step: u8) -> Result<()> {
        if !(1..=6).contains(&step) {
            return Err(Error::Invalid(format!("step must be 1..=6 (got {})", step)));
        }
        Ok(())
    }

    pub fn apply_set_step(&mut self, step: u8) {
        self.step = step;
    }

    pub fn apply_set_context(&mut self, context: String) {
        self.company_context = Some(context);
    }

    // ------------------------------------------------------------------
    // Ideas (read side)
    // ------------------------------------------------------------------

    /// All ideas in deterministic order: sheet ascending, round
    /// ascending, position 1..=3
    pub fn all_ideas(&self) -> Vec<Idea> {
        let mut out = Vec::with_capacity(self.ideas.len() * IDEAS_PER_BATCH);
        for ((sheet, round), batch) in &self.ideas {
            for (offset, text) in batch.ideas.iter().enumerate() {
                let position = offset as u8 + 1;
                out.push(Idea {
                    id: idea_id(*sheet, *round, position),
                    sheet_index: *sheet,
                    round: *round,
                    position,
                    author: batch.author,
                    text: text.clone(),
                });
            }
        }
        out
    }

    /// Ideas authored so far on one sheet, in round order. Used as
    /// context for the AI contributor.
    pub fn sheet_ideas(&self, sheet: usize) -> Vec<String> {
        self.ideas
            .range((sheet, 0)..=(sheet, ROUND_COUNT))
            .flat_map(|(_, batch)| batch.ideas.iter().cloned())
            .collect()
    }

    pub fn cluster(&self, cluster_id: &str) -> Result<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.id == cluster_id)
            .ok_or_else(|| Error::Missing(format!("unknown cluster {}", cluster_id)))
    }

    pub fn ideas_for_cluster(&self, cluster_id: &str) -> Result<Vec<Idea>> {
        let cluster = self.cluster(cluster_id)?;
        let members: BTreeSet<&str> =
            cluster.member_idea_ids.iter().map(|s| s.as_str()).collect();
        Ok(self
            .all_ideas()
            .into_iter()
            .filter(|idea| members.contains(idea.id.as_str()))
            .collect())
    }

    // ------------------------------------------------------------------
    // Clusters and selection
    // ------------------------------------------------------------------

    /// Gate for cluster generation. Returns the idea set the builder
    /// will consume; `None` means existing clusters should be returned
    /// unchanged (no regeneration requested).
    pub fn validate_generate_clusters(&self, regenerate: bool) -> Result<Option<Vec<Idea>>> {
        match self.phase {
            SessionPhase::Finished => {}
            SessionPhase::Skipped => {
                return Err(Error::PreconditionFailed(
                    "brainwriting was skipped; there are no ideas to cluster".into(),
                ))
            }
            _ => {
                return Err(Error::PreconditionFailed(
                    "brainwriting has not finished".into(),
                ))
            }
        }
        if !self.clusters.is_empty() && !regenerate {
            return Ok(None);
        }
        let ideas = self.all_ideas();
        if ideas.is_empty() {
            return Err(Error::PreconditionFailed("session has no ideas".into()));
        }
        Ok(Some(ideas))
    }

    /// Install clusters. Clears both voting phases, the selection pin,
    /// and cached labels: votes scoped to the old clusters are
    /// meaningless once that scope is gone.
    pub fn apply_clusters(&mut self, clusters: Vec<Cluster>) {
        self.clusters = clusters;
        self.cluster_votes.clear();
        self.idea_votes.clear();
        self.selected_cluster = None;
        self.idea_labels.clear();
        self.assessed_cluster = None;
    }

    /// Returns true when the selection is a no-op (same cluster pinned)
    pub fn validate_select(&self, cluster_id: &str) -> Result<bool> {
        if self.clusters.is_empty() {
            return Err(Error::PreconditionFailed("clusters not generated yet".into()));
        }
        self.cluster(cluster_id)?;
        if self.selected_cluster.as_deref() == Some(cluster_id) {
            return Ok(true);
        }
        if !self.idea_votes.is_empty() {
            return Err(Error::PreconditionFailed(
                "cannot switch clusters after idea votes exist".into(),
            ));
        }
        Ok(false)
    }

    pub fn apply_select(&mut self, cluster_id: String) {
        if self.assessed_cluster.as_deref() != Some(cluster_id.as_str()) {
            self.idea_labels.clear();
            self.assessed_cluster = None;
        }
        self.selected_cluster = Some(cluster_id);
    }

    // ------------------------------------------------------------------
    // Voting
    // ------------------------------------------------------------------

    /// Target scope for a phase: all cluster ids, or all idea ids of the
    /// selected cluster
    pub fn vote_scope(&self, phase: VotePhase) -> Result<BTreeSet<String>> {
        match phase {
            VotePhase::Cluster => {
                if self.clusters.is_empty() {
                    return Err(Error::PreconditionFailed(
                        "cluster voting requires generated clusters".into(),
                    ));
                }
                Ok(self.clusters.iter().map(|c| c.id.clone()).collect())
            }
            VotePhase::Idea => {
                let selected = self.selected_cluster.as_deref().ok_or_else(|| {
                    Error::PreconditionFailed(
                        "idea voting requires a selected cluster".into(),
                    )
                })?;
                Ok(self
                    .ideas_for_cluster(selected)?
                    .into_iter()
                    .map(|idea| idea.id)
                    .collect())
            }
        }
    }

    pub fn votes_for(&self, phase: VotePhase) -> &BTreeMap<Uuid, VoteAllocation> {
        match phase {
            VotePhase::Cluster => &self.cluster_votes,
            VotePhase::Idea => &self.idea_votes,
        }
    }

    pub fn validate_vote(
        &self,
        phase: VotePhase,
        participant: Uuid,
        allocation: &BTreeMap<String, u32>,
    ) -> Result<()> {
        self.participant(participant)?;
        if self.votes_for(phase).contains_key(&participant) {
            return Err(Error::PreconditionFailed(format!(
                "already voted in the {} phase",
                phase.as_str()
            )));
        }
        let scope = self.vote_scope(phase)?;
        votes::validate_allocation(allocation, &scope)
    }

    pub fn apply_vote(&mut self, phase: VotePhase, allocation: VoteAllocation) {
        match phase {
            VotePhase::Cluster => self.cluster_votes.insert(allocation.participant, allocation),
            VotePhase::Idea => self.idea_votes.insert(allocation.participant, allocation),
        };
    }

    /// True when every human participant has an allocation for the phase
    pub fn all_humans_voted(&self, phase: VotePhase) -> bool {
        let votes = self.votes_for(phase);
        self.participants
            .iter()
            .filter(|p| p.kind == ParticipantKind::Human)
            .all(|p| votes.contains_key(&p.id))
    }

    /// Would recording `participant`'s allocation complete the phase?
    /// Checked before persistence so the results-ready event can ride
    /// the same transaction as the vote.
    pub fn all_humans_voted_after(&self, phase: VotePhase, participant: Uuid) -> bool {
        let votes = self.votes_for(phase);
        self.participants
            .iter()
            .filter(|p| p.kind == ParticipantKind::Human)
            .all(|p| p.id == participant || votes.contains_key(&p.id))
    }

    pub fn results(&self, phase: VotePhase) -> Result<Ranking> {
        let scope = self.vote_scope(phase)?;
        Ok(votes::tally(self.votes_for(phase), &scope))
    }

    // ------------------------------------------------------------------
    // Assessment
    // ------------------------------------------------------------------

    /// Ideas of the selected cluster, or the reason assessment cannot
    /// run yet. Returns `None` when cached labels already cover the
    /// selected cluster.
    pub fn validate_assess(&self) -> Result<Option<Vec<Idea>>> {
        let selected = self.selected_cluster.as_deref().ok_or_else(|| {
            Error::PreconditionFailed("assessment requires a selected cluster".into())
        })?;
        if self.assessed_cluster.as_deref() == Some(selected) {
            return Ok(None);
        }
        Ok(Some(self.ideas_for_cluster(selected)?))
    }

    pub fn apply_labels(&mut self, cluster_id: String, labels: Vec<IdeaLabel>) {
        self.idea_labels = labels
            .into_iter()
            .map(|label| (label.idea_id.clone(), label))
            .collect();
        self.assessed_cluster = Some(cluster_id);
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Build the envelope the next successful transition will publish.
    /// Does not consume the sequence number; call [`commit_envelope`]
    /// after the transition (and its persistence) succeeded.
    ///
    /// [`commit_envelope`]: SessionState::commit_envelope
    pub fn next_envelope(&self, event: WorkshopEvent, now: DateTime<Utc>) -> EventEnvelope {
        EventEnvelope {
            session_id: self.id,
            seq: self.next_seq,
            ts: now,
            event,
        }
    }

    pub fn commit_envelope(&mut self, envelope: EventEnvelope) {
        debug_assert_eq!(envelope.seq, self.next_seq);
        self.next_seq = envelope.seq + 1;
        self.events.push(envelope);
    }

    pub fn events_since(&self, since: u64) -> Vec<EventEnvelope> {
        self.events
            .iter()
            .filter(|e| e.seq > since)
            .cloned()
            .collect()
    }

    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    // ------------------------------------------------------------------
    // Status and snapshot
    // ------------------------------------------------------------------

    pub fn status(&self) -> SessionStatus {
        let in_round = matches!(self.phase, SessionPhase::InRound { .. });
        let participants = self
            .participants
            .iter()
            .enumerate()
            .map(|(index, p)| ParticipantStatus {
                id: p.id,
                display_name: p.display_name.clone(),
                kind: p.kind,
                is_owner: p.is_owner,
                connected: p.connected,
                submitted: self.submitted.contains(&p.id),
                held_sheet: if in_round {
                    Some(sheets::sheet_held_by(
                        index,
                        self.phase.round(),
                        self.participants.len(),
                    ))
                } else {
                    None
                },
            })
            .collect();

        SessionStatus {
            session_id: self.id,
            created_at: self.created_at,
            step: self.step,
            phase: self.phase,
            participants,
            all_submitted: !self.participants.is_empty() && self.all_submitted(),
            idea_count: self.ideas.len() * IDEAS_PER_BATCH,
            clusters_ready: !self.clusters.is_empty(),
            selected_cluster: self.selected_cluster.clone(),
            cluster_ballots: self.cluster_votes.len(),
            idea_ballots: self.idea_votes.len(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status(),
            ideas: self.all_ideas(),
            clusters: self.clusters.clone(),
            idea_labels: self.idea_labels.values().cloned().collect(),
            cluster_ranking: self.results(VotePhase::Cluster).ok(),
            idea_ranking: self.results(VotePhase::Idea).ok(),
            last_seq: self.last_seq(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_in_lobby(names: &[&str]) -> SessionState {
        let now = Utc::now();
        let mut state = SessionState::new(now);
        state.apply_set_step(BRAINWRITING_STEP);
        for name in names {
            state.validate_join(name).unwrap();
            let p = state.plan_join(name, ParticipantKind::Human, now);
            state.apply_join(p);
        }
        state
    }

    fn submit_all(state: &mut SessionState) {
        let ids: Vec<Uuid> = state.participants.iter().map(|p| p.id).collect();
        for id in ids {
            if state.submitted.contains(&id) {
                continue;
            }
            let ideas = vec!["a".into(), "b".into(), "c".into()];
            let plan = state.validate_submit(id, &ideas, Utc::now()).unwrap();
            state.apply_submit(plan);
        }
    }

    #[test]
    fn test_first_human_joiner_is_owner() {
        let state = session_in_lobby(&["Ada", "Grace"]);
        assert!(state.participants[0].is_owner);
        assert!(!state.participants[1].is_owner);
    }

    #[test]
    fn test_duplicate_name_rejected_case_insensitive() {
        let state = session_in_lobby(&["Ada"]);
        assert!(matches!(
            state.validate_join("ada").unwrap_err(),
            Error::PreconditionFailed(_)
        ));
    }

    #[test]
    fn test_join_after_start_rejected() {
        let mut state = session_in_lobby(&["Ada"]);
        state.validate_start().unwrap();
        state.apply_start();
        assert!(state.validate_join("Grace").is_err());
    }

    #[test]
    fn test_capacity_enforced() {
        let state = session_in_lobby(&["p1", "p2", "p3", "p4", "p5", "p6"]);
        assert!(state.validate_join("p7").is_err());
    }

    #[test]
    fn test_start_requires_brainwriting_step() {
        let now = Utc::now();
        let mut state = SessionState::new(now);
        let p = state.plan_join("Ada", ParticipantKind::Human, now);
        state.apply_join(p);
        // Still at step 1
        assert!(state.validate_start().is_err());
        state.apply_set_step(BRAINWRITING_STEP);
        assert!(state.validate_start().is_ok());
    }

    #[test]
    fn test_submit_wrong_cardinality_rejected() {
        let mut state = session_in_lobby(&["Ada"]);
        state.apply_start();
        let id = state.participants[0].id;
        let two = vec!["a".into(), "b".into()];
        assert!(matches!(
            state.validate_submit(id, &two, Utc::now()).unwrap_err(),
            Error::Invalid(_)
        ));
        let blank = vec!["a".into(), " ".into(), "c".into()];
        assert!(matches!(
            state.validate_submit(id, &blank, Utc::now()).unwrap_err(),
            Error::Invalid(_)
        ));
    }

    #[test]
    fn test_double_submit_rejected() {
        let mut state = session_in_lobby(&["Ada", "Grace"]);
        state.apply_start();
        let id = state.participants[0].id;
        let ideas = vec!["a".into(), "b".into(), "c".into()];
        let plan = state.validate_submit(id, &ideas, Utc::now()).unwrap();
        state.apply_submit(plan);
        assert!(matches!(
            state.validate_submit(id, &ideas, Utc::now()).unwrap_err(),
            Error::PreconditionFailed(_)
        ));
    }

    #[test]
    fn test_advance_gate_requires_all_submitted() {
        let mut state = session_in_lobby(&["Ada", "Grace"]);
        state.apply_start();
        assert!(state.validate_advance(false).is_err());

        let id = state.participants[0].id;
        let plan = state
            .validate_submit(id, &["a".into(), "b".into(), "c".into()], Utc::now())
            .unwrap();
        state.apply_submit(plan);
        assert!(state.validate_advance(false).is_err());
        // Force bypasses the gate
        assert!(state.validate_advance(true).is_ok());

        submit_all(&mut state);
        let plan = state.validate_advance(false).unwrap();
        state.apply_advance(plan);
        assert_eq!(state.phase, SessionPhase::InRound { round: 2 });
        assert!(state.submitted.is_empty());
    }

    #[test]
    fn test_six_rounds_then_finished() {
        let mut state = session_in_lobby(&["Ada", "Grace", "Edsger"]);
        state.apply_start();
        for _ in 1..=6 {
            submit_all(&mut state);
            let plan = state.validate_advance(false).unwrap();
            state.apply_advance(plan);
        }
        assert_eq!(state.phase, SessionPhase::Finished);
        assert_eq!(state.all_ideas().len(), 3 * 3 * 6);
    }

    #[test]
    fn test_ideas_rotate_onto_distinct_sheets() {
        let mut state = session_in_lobby(&["Ada", "Grace", "Edsger"]);
        state.apply_start();
        for _ in 1..=2 {
            submit_all(&mut state);
            let plan = state.validate_advance(false).unwrap();
            state.apply_advance(plan);
        }
        // After two rounds every sheet carries two batches
        for sheet in 0..3 {
            assert!(state.ideas.contains_key(&(sheet, 1)));
            assert!(state.ideas.contains_key(&(sheet, 2)));
        }
        // Round-2 batch on sheet 0 was written by the round-2 holder
        let holder = state.participants[sheets::holder_of(0, 2, 3)].id;
        assert_eq!(state.ideas[&(0, 2)].author, holder);
    }

    #[test]
    fn test_skip_from_round() {
        let mut state = session_in_lobby(&["Ada"]);
        state.apply_start();
        state.validate_skip().unwrap();
        state.apply_skip();
        assert_eq!(state.phase, SessionPhase::Skipped);
        assert!(state.validate_generate_clusters(false).is_err());
    }

    #[test]
    fn test_generate_clusters_gate() {
        let mut state = session_in_lobby(&["Ada"]);
        assert!(state.validate_generate_clusters(false).is_err());
        state.apply_start();
        assert!(state.validate_generate_clusters(false).is_err());
        for _ in 1..=6 {
            submit_all(&mut state);
            let plan = state.validate_advance(false).unwrap();
            state.apply_advance(plan);
        }
        let ideas = state.validate_generate_clusters(false).unwrap().unwrap();
        assert_eq!(ideas.len(), 18);
    }

    #[test]
    fn test_regenerate_clears_votes_and_selection() {
        let mut state = session_in_lobby(&["Ada"]);
        state.apply_start();
        for _ in 1..=6 {
            submit_all(&mut state);
            let plan = state.validate_advance(false).unwrap();
            state.apply_advance(plan);
        }
        let ideas = state.validate_generate_clusters(false).unwrap().unwrap();
        state.apply_clusters(super::super::clusters::fallback_clusters(&ideas));

        let voter = state.participants[0].id;
        let mut allocation = BTreeMap::new();
        allocation.insert(state.clusters[0].id.clone(), 3);
        state.validate_vote(VotePhase::Cluster, voter, &allocation).unwrap();
        state.apply_vote(
            VotePhase::Cluster,
            VoteAllocation { participant: voter, points: allocation },
        );
        assert!(state.validate_select(&state.clusters[0].id.clone()).is_ok());
        state.apply_select(state.clusters[0].id.clone());

        // Existing clusters without regenerate: no rebuild
        assert!(state.validate_generate_clusters(false).unwrap().is_none());

        let ideas = state.validate_generate_clusters(true).unwrap().unwrap();
        state.apply_clusters(super::super::clusters::fallback_clusters(&ideas));
        assert!(state.cluster_votes.is_empty());
        assert!(state.idea_votes.is_empty());
        assert!(state.selected_cluster.is_none());
    }

    #[test]
    fn test_envelope_sequence_gap_free() {
        let mut state = SessionState::new(Utc::now());
        let e1 = state.next_envelope(WorkshopEvent::SessionSkipped, Utc::now());
        assert_eq!(e1.seq, 1);
        // Not committed (e.g. persistence failed): seq is reused
        let e1b = state.next_envelope(WorkshopEvent::SessionSkipped, Utc::now());
        assert_eq!(e1b.seq, 1);
        state.commit_envelope(e1b);
        let e2 = state.next_envelope(WorkshopEvent::SessionSkipped, Utc::now());
        assert_eq!(e2.seq, 2);
        assert_eq!(state.last_seq(), 1);
    }
}
