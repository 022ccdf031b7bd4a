//! Session coordination
//!
//! [`Coordinator`] is the façade over the session core: it validates
//! caller authority, serializes all mutating work on one session
//! through that session's critical section, persists every transition
//! before publishing its event, and drives the external collaborators.
//! Different sessions progress independently.

pub mod clusters;
pub mod sheets;
pub mod state;
pub mod votes;

use chrono::Utc;
use ideaforge_common::events::{EventBus, EventEnvelope, WorkshopEvent};
use ideaforge_common::model::{
    Cluster, Idea, IdeaLabel, Participant, ParticipantKind, Ranking, SessionPhase,
    SessionStatus, VoteAllocation, VotePhase, IDEAS_PER_BATCH,
};
use ideaforge_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::store;
use crate::llm::{with_timeout, Collaborators, ContributionRequest};
use state::{SessionSnapshot, SessionState};

/// Orchestrates all sessions of this deployment
pub struct Coordinator {
    pool: SqlitePool,
    bus: EventBus,
    collaborators: Collaborators,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<SessionState>>>>,
}

impl Coordinator {
    pub fn new(pool: SqlitePool, bus: EventBus, collaborators: Collaborators) -> Self {
        Self {
            pool,
            bus,
            collaborators,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Reload every persisted session. Called once at startup, before
    /// the HTTP surface accepts traffic.
    pub async fn restore(&self) -> Result<usize> {
        let restored = store::load_all(&self.pool).await?;
        let count = restored.len();
        let mut sessions = self.sessions.write().await;
        for state in restored {
            sessions.insert(state.id, Arc::new(Mutex::new(state)));
        }
        Ok(count)
    }

    async fn slot(&self, session_id: Uuid) -> Result<Arc<Mutex<SessionState>>> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| Error::Missing(format!("unknown session {}", session_id)))
    }

    fn require_owner(state: &SessionState, token: Uuid) -> Result<()> {
        if state.owner_token == token {
            Ok(())
        } else {
            Err(Error::NotAuthorized("owner credential required".into()))
        }
    }

    /// Persist one envelope in an open transaction, then (after commit)
    /// record and broadcast it
    fn publish(&self, state: &mut SessionState, envelope: EventEnvelope) {
        state.commit_envelope(envelope.clone());
        self.bus.emit_lossy(envelope);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a fresh session; returns (session handle, owner token)
    pub async fn create_session(&self) -> Result<(Uuid, Uuid)> {
        let state = SessionState::new(Utc::now());
        let session_id = state.id;
        let owner_token = state.owner_token;

        let mut tx = self.pool.begin().await?;
        store::insert_session(&mut tx, &state).await?;
        tx.commit().await?;

        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(state)));
        info!(%session_id, "session created");
        Ok((session_id, owner_token))
    }

    pub async fn join(&self, session_id: Uuid, display_name: &str) -> Result<Uuid> {
        self.join_as(session_id, display_name, ParticipantKind::Human).await
    }

    /// Insert an AI surrogate; owner only, lobby only
    pub async fn add_ai_participant(
        &self,
        session_id: Uuid,
        owner_token: Uuid,
        display_name: &str,
    ) -> Result<Uuid> {
        {
            let slot = self.slot(session_id).await?;
            let state = slot.lock().await;
            Self::require_owner(&state, owner_token)?;
        }
        self.join_as(session_id, display_name, ParticipantKind::AiSurrogate).await
    }

    async fn join_as(
        &self,
        session_id: Uuid,
        display_name: &str,
        kind: ParticipantKind,
    ) -> Result<Uuid> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        let now = Utc::now();

        state.validate_join(display_name)?;
        let participant = state.plan_join(display_name, kind, now);
        let envelope = state.next_envelope(
            WorkshopEvent::ParticipantJoined {
                participant: participant.id,
                display_name: participant.display_name.clone(),
                kind,
                is_owner: participant.is_owner,
            },
            now,
        );

        let mut tx = self.pool.begin().await?;
        store::insert_participant(&mut tx, session_id, &participant, state.participants.len())
            .await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        let participant_id = participant.id;
        state.apply_join(participant);
        self.publish(&mut state, envelope);
        info!(%session_id, %participant_id, ?kind, "participant joined");
        Ok(participant_id)
    }

    pub async fn leave(&self, session_id: Uuid, participant_id: Uuid) -> Result<()> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        state.participant(participant_id)?;
        let now = Utc::now();
        let envelope = state.next_envelope(
            WorkshopEvent::ParticipantLeft { participant: participant_id },
            now,
        );

        let mut tx = self.pool.begin().await?;
        store::set_participant_connected(&mut tx, session_id, participant_id, false).await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        state.apply_connected(participant_id, false);
        self.publish(&mut state, envelope);
        Ok(())
    }

    pub async fn set_step(&self, session_id: Uuid, owner_token: Uuid, step: u8) -> Result<()> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        Self::require_owner(&state, owner_token)?;
        state.validate_set_step(step)?;
        let now = Utc::now();
        let envelope = state.next_envelope(WorkshopEvent::StepChanged { step }, now);

        let mut tx = self.pool.begin().await?;
        store::update_step(&mut tx, session_id, step).await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        state.apply_set_step(step);
        self.publish(&mut state, envelope);
        Ok(())
    }

    /// Store the company context used to ground collaborator calls.
    /// Not a state-machine transition; publishes no event.
    pub async fn set_context(
        &self,
        session_id: Uuid,
        owner_token: Uuid,
        context: String,
    ) -> Result<()> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        Self::require_owner(&state, owner_token)?;

        let mut tx = self.pool.begin().await?;
        store::update_context(&mut tx, session_id, &context).await?;
        tx.commit().await?;

        state.apply_set_context(context);
        Ok(())
    }

    pub async fn start(&self, session_id: Uuid, owner_token: Uuid) -> Result<()> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        Self::require_owner(&state, owner_token)?;
        state.validate_start()?;
        let now = Utc::now();
        let envelope = state.next_envelope(
            WorkshopEvent::SessionStarted {
                participant_count: state.participants.len(),
            },
            now,
        );

        let mut tx = self.pool.begin().await?;
        store::update_phase(
            &mut tx,
            session_id,
            &SessionPhase::InRound { round: 1 },
        )
        .await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        state.apply_start();
        self.publish(&mut state, envelope);
        info!(%session_id, participants = state.participants.len(), "brainwriting started");
        Ok(())
    }

    pub async fn skip(&self, session_id: Uuid, owner_token: Uuid) -> Result<()> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        Self::require_owner(&state, owner_token)?;
        state.validate_skip()?;
        let now = Utc::now();
        let envelope = state.next_envelope(WorkshopEvent::SessionSkipped, now);

        let mut tx = self.pool.begin().await?;
        store::update_phase(
            &mut tx,
            session_id,
            &SessionPhase::Skipped,
        )
        .await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        state.apply_skip();
        self.publish(&mut state, envelope);
        info!(%session_id, "brainwriting skipped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rounds and ideas
    // ------------------------------------------------------------------

    pub async fn submit_ideas(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        ideas: Vec<String>,
    ) -> Result<()> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        let now = Utc::now();
        let plan = state.validate_submit(participant_id, &ideas, now)?;
        let envelope = state.next_envelope(
            WorkshopEvent::IdeasSubmitted {
                participant: participant_id,
                round: plan.round,
                sheet: plan.sheet,
            },
            now,
        );

        let mut tx = self.pool.begin().await?;
        store::insert_idea_batch(&mut tx, session_id, plan.sheet, plan.round, &plan.batch)
            .await?;
        store::set_participant_connected(&mut tx, session_id, participant_id, true).await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        let (sheet, round) = (plan.sheet, plan.round);
        state.apply_submit(plan);
        state.apply_connected(participant_id, true);
        self.publish(&mut state, envelope);
        info!(%session_id, %participant_id, round, sheet, "ideas submitted");
        Ok(())
    }

    /// Produce and submit a batch for an AI surrogate. Idempotent per
    /// (participant, round): once the surrogate has submitted, the same
    /// batch is returned without calling the contributor again.
    /// Returns (ideas, served-from-cache).
    pub async fn request_ai_ideas(
        &self,
        session_id: Uuid,
        owner_token: Uuid,
        ai_participant: Uuid,
    ) -> Result<(Vec<String>, bool)> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        Self::require_owner(&state, owner_token)?;

        let participant = state.participant(ai_participant)?;
        if participant.kind != ParticipantKind::AiSurrogate {
            return Err(Error::Invalid(format!(
                "participant {:?} is not an AI surrogate",
                participant.display_name
            )));
        }
        let participant_name = participant.display_name.clone();

        let round = state.current_round()?;
        let sheet = state.held_sheet(ai_participant)?;
        if state.submitted.contains(&ai_participant) {
            let batch = state
                .ideas
                .get(&(sheet, round))
                .ok_or_else(|| Error::Conflict("submitted flag without batch".into()))?;
            return Ok((batch.ideas.to_vec(), true));
        }

        let contributor = self
            .collaborators
            .contributor
            .clone()
            .ok_or_else(|| Error::ExternalUnavailable("no idea contributor configured".into()))?;

        let request = ContributionRequest {
            participant_name,
            round,
            sheet_ideas: state.sheet_ideas(sheet),
            company_context: state.company_context.clone(),
        };
        let generated =
            with_timeout(self.collaborators.call_timeout, contributor.generate(&request)).await?;

        let now = Utc::now();
        let plan = state.validate_submit(ai_participant, &generated, now)?;
        let envelope = state.next_envelope(
            WorkshopEvent::IdeasSubmitted {
                participant: ai_participant,
                round: plan.round,
                sheet: plan.sheet,
            },
            now,
        );

        let mut tx = self.pool.begin().await?;
        store::insert_idea_batch(&mut tx, session_id, plan.sheet, plan.round, &plan.batch)
            .await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        state.apply_submit(plan);
        self.publish(&mut state, envelope);
        info!(%session_id, %ai_participant, round, "AI ideas generated and submitted");
        Ok((generated.to_vec(), false))
    }

    pub async fn advance_round(
        &self,
        session_id: Uuid,
        owner_token: Uuid,
        force: bool,
    ) -> Result<()> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        Self::require_owner(&state, owner_token)?;
        let plan = state.validate_advance(force)?;
        let now = Utc::now();

        let event = match plan.next {
            SessionPhase::Finished => WorkshopEvent::SessionComplete {
                idea_count: state.ideas.len() * IDEAS_PER_BATCH,
            },
            next => WorkshopEvent::RoundAdvanced { new_round: next.round(), forced: force },
        };
        let envelope = state.next_envelope(event, now);

        let mut tx = self.pool.begin().await?;
        store::update_phase(&mut tx, session_id, &plan.next).await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        let next = plan.next;
        state.apply_advance(plan);
        self.publish(&mut state, envelope);
        info!(%session_id, ?next, forced = force, "round advanced");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Clusters
    // ------------------------------------------------------------------

    /// Generate (or return existing) clusters. The semantic grouping
    /// source is tried first; unavailability, malformed output, and
    /// invalid partitions all route to the deterministic fallback, so
    /// this never fails once brainwriting has finished with ideas.
    pub async fn generate_clusters(
        &self,
        session_id: Uuid,
        owner_token: Uuid,
        regenerate: bool,
    ) -> Result<Vec<Cluster>> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        Self::require_owner(&state, owner_token)?;

        let ideas = match state.validate_generate_clusters(regenerate)? {
            Some(ideas) => ideas,
            None => return Ok(state.clusters.clone()),
        };

        let built = match &self.collaborators.grouper {
            Some(grouper) => {
                let attempt = with_timeout(
                    self.collaborators.call_timeout,
                    grouper.group(&ideas, state.company_context.as_deref()),
                )
                .await
                .and_then(|drafts| clusters::validate_drafts(drafts, &ideas));
                match attempt {
                    Ok(validated) => validated,
                    Err(e) => {
                        warn!(%session_id, error = %e, "semantic grouping failed; using fallback");
                        clusters::fallback_clusters(&ideas)
                    }
                }
            }
            None => clusters::fallback_clusters(&ideas),
        };

        let fallback = built.iter().any(|c| c.fallback);
        let now = Utc::now();
        let envelope = state.next_envelope(
            WorkshopEvent::ClustersReady { cluster_count: built.len(), fallback },
            now,
        );

        let mut tx = self.pool.begin().await?;
        store::replace_clusters(&mut tx, session_id, &built).await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        state.apply_clusters(built.clone());
        self.publish(&mut state, envelope);
        info!(%session_id, count = built.len(), fallback, regenerate, "clusters ready");
        Ok(built)
    }

    pub async fn select_cluster(
        &self,
        session_id: Uuid,
        owner_token: Uuid,
        cluster_id: &str,
    ) -> Result<()> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        Self::require_owner(&state, owner_token)?;
        if state.validate_select(cluster_id)? {
            // Same cluster already pinned
            return Ok(());
        }

        let keep_labels = state.assessed_cluster.as_deref() == Some(cluster_id);
        let now = Utc::now();
        let envelope = state.next_envelope(
            WorkshopEvent::ClusterSelected { cluster_id: cluster_id.to_string() },
            now,
        );

        let mut tx = self.pool.begin().await?;
        if !keep_labels {
            store::clear_idea_labels(&mut tx, session_id).await?;
        }
        store::update_selection(
            &mut tx,
            session_id,
            Some(cluster_id),
            keep_labels.then_some(cluster_id),
        )
        .await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        state.apply_select(cluster_id.to_string());
        self.publish(&mut state, envelope);
        info!(%session_id, cluster_id, "cluster selected");
        Ok(())
    }

    /// Label the selected cluster's ideas. Runs the assessor once per
    /// selected cluster and caches the result. Assessor failure is
    /// soft: the ideas stay unlabelled and the call still succeeds.
    pub async fn assess_cluster(
        &self,
        session_id: Uuid,
        owner_token: Uuid,
    ) -> Result<Vec<IdeaLabel>> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        Self::require_owner(&state, owner_token)?;

        let ideas = match state.validate_assess()? {
            Some(ideas) => ideas,
            None => return Ok(state.idea_labels.values().cloned().collect()),
        };
        let cluster_id = state
            .selected_cluster
            .clone()
            .ok_or_else(|| Error::Conflict("selection vanished during assessment".into()))?;

        let Some(assessor) = self.collaborators.assessor.clone() else {
            warn!(%session_id, "no idea assessor configured; ideas stay unlabelled");
            return Ok(Vec::new());
        };

        let labels = match with_timeout(
            self.collaborators.call_timeout,
            assessor.assess(&ideas, state.company_context.as_deref()),
        )
        .await
        {
            Ok(labels) => labels,
            Err(e) => {
                warn!(%session_id, error = %e, "idea assessment failed; ideas stay unlabelled");
                return Ok(Vec::new());
            }
        };

        // Untrusted output: keep only labels for ideas of this cluster
        let member_ids: std::collections::BTreeSet<&str> =
            ideas.iter().map(|i| i.id.as_str()).collect();
        let labels: Vec<IdeaLabel> = labels
            .into_iter()
            .filter(|label| member_ids.contains(label.idea_id.as_str()))
            .collect();
        if labels.is_empty() {
            warn!(%session_id, "assessor labelled no known ideas; ideas stay unlabelled");
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let envelope = state.next_envelope(
            WorkshopEvent::IdeasAssessed { cluster_id: cluster_id.clone() },
            now,
        );

        let mut tx = self.pool.begin().await?;
        store::store_idea_labels(&mut tx, session_id, &cluster_id, &labels).await?;
        store::append_event(&mut tx, &envelope).await?;
        tx.commit().await?;

        state.apply_labels(cluster_id, labels.clone());
        self.publish(&mut state, envelope);
        Ok(labels)
    }

    // ------------------------------------------------------------------
    // Voting
    // ------------------------------------------------------------------

    pub async fn submit_vote(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        phase: VotePhase,
        allocation: BTreeMap<String, u32>,
    ) -> Result<()> {
        let slot = self.slot(session_id).await?;
        let mut state = slot.lock().await;
        let now = Utc::now();
        state.validate_vote(phase, participant_id, &allocation)?;

        let vote_event = match phase {
            VotePhase::Cluster => WorkshopEvent::ClusterVoteRecorded { participant: participant_id },
            VotePhase::Idea => WorkshopEvent::IdeaVoteRecorded { participant: participant_id },
        };
        let envelope = state.next_envelope(vote_event, now);

        // Last human ballot also closes the phase
        let results_envelope = state
            .all_humans_voted_after(phase, participant_id)
            .then(|| EventEnvelope {
                session_id,
                seq: envelope.seq + 1,
                ts: now,
                event: match phase {
                    VotePhase::Cluster => WorkshopEvent::ClusterResultsReady,
                    VotePhase::Idea => WorkshopEvent::IdeaResultsReady,
                },
            });

        let vote = VoteAllocation { participant: participant_id, points: allocation };

        let mut tx = self.pool.begin().await?;
        store::insert_vote(&mut tx, session_id, phase, &vote).await?;
        store::set_participant_connected(&mut tx, session_id, participant_id, true).await?;
        store::append_event(&mut tx, &envelope).await?;
        if let Some(ready) = &results_envelope {
            store::append_event(&mut tx, ready).await?;
        }
        tx.commit().await?;

        state.apply_vote(phase, vote);
        state.apply_connected(participant_id, true);
        self.publish(&mut state, envelope);
        if let Some(ready) = results_envelope {
            self.publish(&mut state, ready);
        }
        info!(%session_id, %participant_id, phase = phase.as_str(), "vote recorded");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn status(&self, session_id: Uuid) -> Result<SessionStatus> {
        let slot = self.slot(session_id).await?;
        let state = slot.lock().await;
        Ok(state.status())
    }

    pub async fn snapshot(&self, session_id: Uuid) -> Result<SessionSnapshot> {
        let slot = self.slot(session_id).await?;
        let state = slot.lock().await;
        Ok(state.snapshot())
    }

    pub async fn list_participants(&self, session_id: Uuid) -> Result<Vec<Participant>> {
        let slot = self.slot(session_id).await?;
        let state = slot.lock().await;
        Ok(state.participants.clone())
    }

    pub async fn list_ideas(&self, session_id: Uuid) -> Result<Vec<Idea>> {
        let slot = self.slot(session_id).await?;
        let state = slot.lock().await;
        Ok(state.all_ideas())
    }

    pub async fn list_clusters(&self, session_id: Uuid) -> Result<Vec<Cluster>> {
        let slot = self.slot(session_id).await?;
        let state = slot.lock().await;
        Ok(state.clusters.clone())
    }

    pub async fn results(&self, session_id: Uuid, phase: VotePhase) -> Result<Ranking> {
        let slot = self.slot(session_id).await?;
        let state = slot.lock().await;
        state.results(phase)
    }

    pub async fn events_since(
        &self,
        session_id: Uuid,
        since: u64,
    ) -> Result<Vec<EventEnvelope>> {
        let slot = self.slot(session_id).await?;
        let state = slot.lock().await;
        Ok(state.events_since(since))
    }
}
