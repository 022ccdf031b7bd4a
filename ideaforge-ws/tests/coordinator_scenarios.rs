//! End-to-end coordinator scenarios over an in-memory database with
//! scripted collaborators

use async_trait::async_trait;
use ideaforge_common::events::EventBus;
use ideaforge_common::model::{
    Idea, IdeaLabel, LevelLabel, SessionPhase, VotePhase, IDEAS_PER_BATCH,
};
use ideaforge_common::{Error, Result};
use ideaforge_ws::llm::{
    Collaborators, ContributionRequest, IdeaAssessor, IdeaContributor, SemanticGrouper,
};
use ideaforge_ws::session::clusters::ClusterDraft;
use ideaforge_ws::Coordinator;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// ----------------------------------------------------------------------
// Scripted collaborators
// ----------------------------------------------------------------------

/// Contributor that fails in one configured round and counts its calls
struct ScriptedContributor {
    fail_in_round: Option<u8>,
    calls: AtomicUsize,
}

impl ScriptedContributor {
    fn new(fail_in_round: Option<u8>) -> Arc<Self> {
        Arc::new(Self { fail_in_round, calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl IdeaContributor for ScriptedContributor {
    async fn generate(
        &self,
        request: &ContributionRequest,
    ) -> Result<[String; IDEAS_PER_BATCH]> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_in_round == Some(request.round) {
            return Err(Error::ExternalUnavailable("model endpoint down".into()));
        }
        Ok([
            format!("{} round {} idea 1", request.participant_name, request.round),
            format!("{} round {} idea 2", request.participant_name, request.round),
            format!("{} round {} idea 3", request.participant_name, request.round),
        ])
    }
}

/// Grouper producing a valid k-way partition in round-robin order
struct PartitionGrouper {
    k: usize,
}

#[async_trait]
impl SemanticGrouper for PartitionGrouper {
    async fn group(&self, ideas: &[Idea], _context: Option<&str>) -> Result<Vec<ClusterDraft>> {
        let mut drafts: Vec<ClusterDraft> = (0..self.k)
            .map(|i| ClusterDraft {
                name: format!("Theme {}", i + 1),
                description: format!("Ideas about theme {}", i + 1),
                member_idea_ids: Vec::new(),
                business_impact: LevelLabel::High,
                implementation_effort: LevelLabel::Medium,
                maturity_appropriateness: LevelLabel::Medium,
                impact_rationale: "clear revenue potential".into(),
                maturity_rationale: "matches current tooling".into(),
            })
            .collect();
        for (index, idea) in ideas.iter().enumerate() {
            drafts[index % self.k].member_idea_ids.push(idea.id.clone());
        }
        Ok(drafts)
    }
}

/// Grouper that always raises
struct FailingGrouper;

#[async_trait]
impl SemanticGrouper for FailingGrouper {
    async fn group(&self, _ideas: &[Idea], _context: Option<&str>) -> Result<Vec<ClusterDraft>> {
        Err(Error::ExternalUnavailable("grouping endpoint down".into()))
    }
}

/// Assessor labelling every idea high impact / low effort
struct UniformAssessor;

#[async_trait]
impl IdeaAssessor for UniformAssessor {
    async fn assess(&self, ideas: &[Idea], _context: Option<&str>) -> Result<Vec<IdeaLabel>> {
        Ok(ideas
            .iter()
            .map(|idea| IdeaLabel {
                idea_id: idea.id.clone(),
                business_impact: LevelLabel::High,
                implementation_effort: LevelLabel::Low,
                impact_rationale: format!("{} pays off quickly", idea.id),
            })
            .collect())
    }
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

async fn coordinator(collaborators: Collaborators) -> Arc<Coordinator> {
    let pool = ideaforge_ws::db::init_memory_pool().await.unwrap();
    Arc::new(Coordinator::new(pool, EventBus::new(256), collaborators))
}

/// Create a session at the brainwriting step with the given humans
/// joined. Returns (coordinator-session, owner token, participant ids).
async fn session_with_humans(
    coordinator: &Coordinator,
    names: &[&str],
) -> (Uuid, Uuid, Vec<Uuid>) {
    let (session_id, owner_token) = coordinator.create_session().await.unwrap();
    coordinator.set_step(session_id, owner_token, 2).await.unwrap();
    let mut participants = Vec::new();
    for name in names {
        participants.push(coordinator.join(session_id, name).await.unwrap());
    }
    (session_id, owner_token, participants)
}

fn batch(prefix: &str, round: u8) -> Vec<String> {
    (1..=3).map(|i| format!("{} r{} idea {}", prefix, round, i)).collect()
}

fn points(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
    pairs.iter().map(|(t, p)| (t.to_string(), *p)).collect()
}

async fn run_full_brainwriting(
    coordinator: &Coordinator,
    session_id: Uuid,
    owner_token: Uuid,
    participants: &[Uuid],
) {
    coordinator.start(session_id, owner_token).await.unwrap();
    for round in 1..=6u8 {
        for (index, participant) in participants.iter().enumerate() {
            coordinator
                .submit_ideas(session_id, *participant, batch(&format!("p{}", index), round))
                .await
                .unwrap();
        }
        coordinator.advance_round(session_id, owner_token, false).await.unwrap();
    }
}

// ----------------------------------------------------------------------
// S1: happy path, 3 humans, 6 rounds
// ----------------------------------------------------------------------

#[tokio::test]
async fn s1_three_humans_six_rounds_full_pipeline() {
    let contributor = ScriptedContributor::new(None);
    let coordinator = coordinator(Collaborators {
        contributor: Some(contributor),
        grouper: Some(Arc::new(PartitionGrouper { k: 5 })),
        assessor: Some(Arc::new(UniformAssessor)),
        ..Collaborators::disabled()
    })
    .await;

    let (session_id, owner_token, participants) =
        session_with_humans(&coordinator, &["Ada", "Grace", "Edsger"]).await;
    run_full_brainwriting(&coordinator, session_id, owner_token, &participants).await;

    let status = coordinator.status(session_id).await.unwrap();
    assert_eq!(status.phase, SessionPhase::Finished);
    assert_eq!(status.idea_count, 54);
    assert_eq!(coordinator.list_ideas(session_id).await.unwrap().len(), 54);

    // Clusters from the primary source
    let clusters = coordinator
        .generate_clusters(session_id, owner_token, false)
        .await
        .unwrap();
    assert_eq!(clusters.len(), 5);
    assert!(clusters.iter().all(|c| !c.fallback));
    let member_total: usize = clusters.iter().map(|c| c.member_idea_ids.len()).sum();
    assert_eq!(member_total, 54);

    // Phase 1: everyone puts 3 points on c2
    for participant in &participants {
        coordinator
            .submit_vote(session_id, *participant, VotePhase::Cluster, points(&[("c2", 3)]))
            .await
            .unwrap();
    }
    let ranking = coordinator.results(session_id, VotePhase::Cluster).await.unwrap();
    assert_eq!(ranking.top, vec!["c2".to_string()]);
    assert_eq!(ranking.entries[0].total_points, 9);
    assert_eq!(ranking.ballots, 3);

    coordinator.select_cluster(session_id, owner_token, "c2").await.unwrap();

    // Assessment labels every idea of the selected cluster
    let labels = coordinator.assess_cluster(session_id, owner_token).await.unwrap();
    let c2_size = clusters.iter().find(|c| c.id == "c2").unwrap().member_idea_ids.len();
    assert_eq!(labels.len(), c2_size);

    // Phase 2: everyone backs the same idea
    let target = clusters.iter().find(|c| c.id == "c2").unwrap().member_idea_ids[0].clone();
    for participant in &participants {
        coordinator
            .submit_vote(
                session_id,
                *participant,
                VotePhase::Idea,
                points(&[(target.as_str(), 3)]),
            )
            .await
            .unwrap();
    }
    let ranking = coordinator.results(session_id, VotePhase::Idea).await.unwrap();
    assert_eq!(ranking.top, vec![target]);
    assert_eq!(ranking.entries[0].total_points, 9);
}

// ----------------------------------------------------------------------
// S2: AI participant fails once; owner force-advances
// ----------------------------------------------------------------------

#[tokio::test]
async fn s2_ai_failure_and_force_advance() {
    let contributor = ScriptedContributor::new(Some(3));
    let coordinator = coordinator(Collaborators {
        contributor: Some(contributor.clone()),
        ..Collaborators::disabled()
    })
    .await;

    let (session_id, owner_token, humans) =
        session_with_humans(&coordinator, &["Ada", "Grace"]).await;
    let ai = coordinator
        .add_ai_participant(session_id, owner_token, "Scribe")
        .await
        .unwrap();

    coordinator.start(session_id, owner_token).await.unwrap();
    for round in 1..=6u8 {
        for (index, human) in humans.iter().enumerate() {
            coordinator
                .submit_ideas(session_id, *human, batch(&format!("h{}", index), round))
                .await
                .unwrap();
        }
        if round == 3 {
            let err = coordinator
                .request_ai_ideas(session_id, owner_token, ai)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::ExternalUnavailable(_)));
            // Gate holds without the AI batch
            let err = coordinator
                .advance_round(session_id, owner_token, false)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::PreconditionFailed(_)));
            coordinator.advance_round(session_id, owner_token, true).await.unwrap();
        } else {
            let (ideas, cached) = coordinator
                .request_ai_ideas(session_id, owner_token, ai)
                .await
                .unwrap();
            assert_eq!(ideas.len(), 3);
            assert!(!cached);
            coordinator.advance_round(session_id, owner_token, false).await.unwrap();
        }
    }

    let status = coordinator.status(session_id).await.unwrap();
    assert_eq!(status.phase, SessionPhase::Finished);
    // 2 humans x 3 x 6 rounds + AI x 3 x 5 rounds
    assert_eq!(status.idea_count, 51);
}

#[tokio::test]
async fn ai_batches_are_idempotent_per_round() {
    let contributor = ScriptedContributor::new(None);
    let coordinator = coordinator(Collaborators {
        contributor: Some(contributor.clone()),
        ..Collaborators::disabled()
    })
    .await;

    let (session_id, owner_token, _) = session_with_humans(&coordinator, &["Ada"]).await;
    let ai = coordinator
        .add_ai_participant(session_id, owner_token, "Scribe")
        .await
        .unwrap();
    coordinator.start(session_id, owner_token).await.unwrap();

    let (first, cached) = coordinator
        .request_ai_ideas(session_id, owner_token, ai)
        .await
        .unwrap();
    assert!(!cached);
    let (second, cached) = coordinator
        .request_ai_ideas(session_id, owner_token, ai)
        .await
        .unwrap();
    assert!(cached);
    assert_eq!(first, second);
    assert_eq!(contributor.calls.load(Ordering::SeqCst), 1);
}

// ----------------------------------------------------------------------
// S3: skip brainwriting
// ----------------------------------------------------------------------

#[tokio::test]
async fn s3_skip_leaves_no_ideas_and_blocks_clustering() {
    let coordinator = coordinator(Collaborators::disabled()).await;
    let (session_id, owner_token, _) = session_with_humans(&coordinator, &["Ada"]).await;
    coordinator.start(session_id, owner_token).await.unwrap();
    coordinator.skip(session_id, owner_token).await.unwrap();

    let status = coordinator.status(session_id).await.unwrap();
    assert_eq!(status.phase, SessionPhase::Skipped);
    assert!(coordinator.list_ideas(session_id).await.unwrap().is_empty());

    let err = coordinator
        .generate_clusters(session_id, owner_token, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)));

    let events = coordinator.events_since(session_id, 0).await.unwrap();
    assert!(events.iter().any(|e| e.event.event_type() == "session_skipped"));
}

// ----------------------------------------------------------------------
// S4: four-way tie in Phase 1
// ----------------------------------------------------------------------

#[tokio::test]
async fn s4_four_way_tie_requires_explicit_selection() {
    let coordinator = coordinator(Collaborators {
        grouper: Some(Arc::new(PartitionGrouper { k: 4 })),
        ..Collaborators::disabled()
    })
    .await;

    let (session_id, owner_token, participants) =
        session_with_humans(&coordinator, &["p1", "p2", "p3", "p4"]).await;
    coordinator.start(session_id, owner_token).await.unwrap();
    for (index, participant) in participants.iter().enumerate() {
        coordinator
            .submit_ideas(session_id, *participant, batch(&format!("p{}", index), 1))
            .await
            .unwrap();
    }
    // Owner cuts the session short after round 1
    for _ in 1..=6 {
        coordinator.advance_round(session_id, owner_token, true).await.unwrap();
    }

    let clusters = coordinator
        .generate_clusters(session_id, owner_token, false)
        .await
        .unwrap();
    assert_eq!(clusters.len(), 4);

    for (index, participant) in participants.iter().enumerate() {
        let target = format!("c{}", index + 1);
        coordinator
            .submit_vote(
                session_id,
                *participant,
                VotePhase::Cluster,
                points(&[(target.as_str(), 3)]),
            )
            .await
            .unwrap();
    }

    let ranking = coordinator.results(session_id, VotePhase::Cluster).await.unwrap();
    assert_eq!(ranking.top.len(), 4);
    for entry in &ranking.entries {
        assert_eq!(entry.rank, 1);
        assert_eq!(entry.total_points, 3);
    }

    // The tie is broken by explicit owner selection
    coordinator.select_cluster(session_id, owner_token, "c3").await.unwrap();
    let status = coordinator.status(session_id).await.unwrap();
    assert_eq!(status.selected_cluster.as_deref(), Some("c3"));
}

// ----------------------------------------------------------------------
// S5: invalid vote leaves state unchanged
// ----------------------------------------------------------------------

#[tokio::test]
async fn s5_invalid_vote_sum_rejected_without_side_effects() {
    let coordinator = coordinator(Collaborators {
        grouper: Some(Arc::new(PartitionGrouper { k: 4 })),
        ..Collaborators::disabled()
    })
    .await;

    let (session_id, owner_token, participants) =
        session_with_humans(&coordinator, &["Ada", "Grace"]).await;
    coordinator.start(session_id, owner_token).await.unwrap();
    for (index, participant) in participants.iter().enumerate() {
        coordinator
            .submit_ideas(session_id, *participant, batch(&format!("p{}", index), 1))
            .await
            .unwrap();
    }
    for _ in 1..=6 {
        coordinator.advance_round(session_id, owner_token, true).await.unwrap();
    }
    coordinator.generate_clusters(session_id, owner_token, false).await.unwrap();

    let err = coordinator
        .submit_vote(
            session_id,
            participants[0],
            VotePhase::Cluster,
            points(&[("c1", 2), ("c2", 2)]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));

    // The other participant's valid vote is unaffected
    coordinator
        .submit_vote(session_id, participants[1], VotePhase::Cluster, points(&[("c1", 3)]))
        .await
        .unwrap();

    let ranking = coordinator.results(session_id, VotePhase::Cluster).await.unwrap();
    assert_eq!(ranking.ballots, 1);

    // The rejected voter can still vote correctly
    coordinator
        .submit_vote(
            session_id,
            participants[0],
            VotePhase::Cluster,
            points(&[("c1", 1), ("c2", 2)]),
        )
        .await
        .unwrap();
    let ranking = coordinator.results(session_id, VotePhase::Cluster).await.unwrap();
    assert_eq!(ranking.ballots, 2);
    assert_eq!(ranking.entries[0].target_id, "c1");
    assert_eq!(ranking.entries[0].total_points, 4);
}

#[tokio::test]
async fn revote_is_rejected() {
    let coordinator = coordinator(Collaborators {
        grouper: Some(Arc::new(PartitionGrouper { k: 4 })),
        ..Collaborators::disabled()
    })
    .await;

    let (session_id, owner_token, participants) =
        session_with_humans(&coordinator, &["Ada"]).await;
    coordinator.start(session_id, owner_token).await.unwrap();
    coordinator
        .submit_ideas(session_id, participants[0], batch("p0", 1))
        .await
        .unwrap();
    for _ in 1..=6 {
        coordinator.advance_round(session_id, owner_token, true).await.unwrap();
    }
    coordinator.generate_clusters(session_id, owner_token, false).await.unwrap();

    coordinator
        .submit_vote(session_id, participants[0], VotePhase::Cluster, points(&[("c1", 3)]))
        .await
        .unwrap();
    let err = coordinator
        .submit_vote(session_id, participants[0], VotePhase::Cluster, points(&[("c2", 3)]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)));
}

// ----------------------------------------------------------------------
// S6: fallback clustering when the grouping source raises
// ----------------------------------------------------------------------

#[tokio::test]
async fn s6_fallback_clustering_on_grouper_failure() {
    let coordinator = coordinator(Collaborators {
        grouper: Some(Arc::new(FailingGrouper)),
        ..Collaborators::disabled()
    })
    .await;

    // Five batches of three: 15 ideas on the table
    let (session_id, owner_token, participants) =
        session_with_humans(&coordinator, &["Ada"]).await;
    coordinator.start(session_id, owner_token).await.unwrap();
    for round in 1..=5u8 {
        coordinator
            .submit_ideas(session_id, participants[0], batch("p0", round))
            .await
            .unwrap();
        coordinator.advance_round(session_id, owner_token, false).await.unwrap();
    }
    coordinator.advance_round(session_id, owner_token, true).await.unwrap();

    // No ExternalUnavailable escapes; the fallback partition is served
    let clusters = coordinator
        .generate_clusters(session_id, owner_token, false)
        .await
        .unwrap();
    assert_eq!(clusters.len(), 3);
    assert!(clusters.iter().all(|c| c.fallback));
    let sizes: Vec<usize> = clusters.iter().map(|c| c.member_idea_ids.len()).collect();
    assert_eq!(sizes, vec![5, 5, 5]);

    // Phase-1 voting proceeds normally over fallback clusters
    coordinator
        .submit_vote(session_id, participants[0], VotePhase::Cluster, points(&[("c2", 3)]))
        .await
        .unwrap();
    let ranking = coordinator.results(session_id, VotePhase::Cluster).await.unwrap();
    assert_eq!(ranking.top, vec!["c2".to_string()]);
}

// ----------------------------------------------------------------------
// Invariant properties
// ----------------------------------------------------------------------

#[tokio::test]
async fn event_sequence_numbers_are_gap_free() {
    let coordinator = coordinator(Collaborators::disabled()).await;
    let (session_id, owner_token, participants) =
        session_with_humans(&coordinator, &["Ada", "Grace"]).await;
    coordinator.start(session_id, owner_token).await.unwrap();
    for (index, participant) in participants.iter().enumerate() {
        coordinator
            .submit_ideas(session_id, *participant, batch(&format!("p{}", index), 1))
            .await
            .unwrap();
    }
    coordinator.advance_round(session_id, owner_token, false).await.unwrap();

    let events = coordinator.events_since(session_id, 0).await.unwrap();
    assert!(!events.is_empty());
    for (index, envelope) in events.iter().enumerate() {
        assert_eq!(envelope.seq, index as u64 + 1);
        assert_eq!(envelope.session_id, session_id);
    }

    // since-replay returns exactly the suffix
    let tail = coordinator.events_since(session_id, 3).await.unwrap();
    assert_eq!(tail.len(), events.len() - 3);
    assert_eq!(tail[0].seq, 4);
}

#[tokio::test]
async fn results_ready_fires_when_last_human_votes() {
    let coordinator = coordinator(Collaborators {
        grouper: Some(Arc::new(PartitionGrouper { k: 4 })),
        ..Collaborators::disabled()
    })
    .await;
    let (session_id, owner_token, participants) =
        session_with_humans(&coordinator, &["Ada", "Grace"]).await;
    coordinator.start(session_id, owner_token).await.unwrap();
    for (index, participant) in participants.iter().enumerate() {
        coordinator
            .submit_ideas(session_id, *participant, batch(&format!("p{}", index), 1))
            .await
            .unwrap();
    }
    for _ in 1..=6 {
        coordinator.advance_round(session_id, owner_token, true).await.unwrap();
    }
    coordinator.generate_clusters(session_id, owner_token, false).await.unwrap();

    coordinator
        .submit_vote(session_id, participants[0], VotePhase::Cluster, points(&[("c1", 3)]))
        .await
        .unwrap();
    let events = coordinator.events_since(session_id, 0).await.unwrap();
    assert!(!events.iter().any(|e| e.event.event_type() == "cluster_results_ready"));

    coordinator
        .submit_vote(session_id, participants[1], VotePhase::Cluster, points(&[("c2", 3)]))
        .await
        .unwrap();
    let events = coordinator.events_since(session_id, 0).await.unwrap();
    let ready_position = events
        .iter()
        .position(|e| e.event.event_type() == "cluster_results_ready")
        .expect("results-ready event after last ballot");
    assert_eq!(
        events[ready_position - 1].event.event_type(),
        "cluster_vote_recorded"
    );
}

#[tokio::test]
async fn regeneration_invalidates_votes_selection_and_labels() {
    let coordinator = coordinator(Collaborators {
        grouper: Some(Arc::new(PartitionGrouper { k: 4 })),
        assessor: Some(Arc::new(UniformAssessor)),
        ..Collaborators::disabled()
    })
    .await;
    let (session_id, owner_token, participants) =
        session_with_humans(&coordinator, &["Ada"]).await;
    coordinator.start(session_id, owner_token).await.unwrap();
    coordinator
        .submit_ideas(session_id, participants[0], batch("p0", 1))
        .await
        .unwrap();
    for _ in 1..=6 {
        coordinator.advance_round(session_id, owner_token, true).await.unwrap();
    }

    coordinator.generate_clusters(session_id, owner_token, false).await.unwrap();
    coordinator
        .submit_vote(session_id, participants[0], VotePhase::Cluster, points(&[("c1", 3)]))
        .await
        .unwrap();
    coordinator.select_cluster(session_id, owner_token, "c1").await.unwrap();
    let labels = coordinator.assess_cluster(session_id, owner_token).await.unwrap();
    assert!(!labels.is_empty());

    // Plain call returns the existing clusters untouched
    coordinator.generate_clusters(session_id, owner_token, false).await.unwrap();
    let status = coordinator.status(session_id).await.unwrap();
    assert_eq!(status.cluster_ballots, 1);
    assert_eq!(status.selected_cluster.as_deref(), Some("c1"));

    // Regeneration clears Phase-1, Phase-2, the pin, and cached labels
    coordinator.generate_clusters(session_id, owner_token, true).await.unwrap();
    let status = coordinator.status(session_id).await.unwrap();
    assert_eq!(status.cluster_ballots, 0);
    assert_eq!(status.idea_ballots, 0);
    assert!(status.selected_cluster.is_none());
    let snapshot = coordinator.snapshot(session_id).await.unwrap();
    assert!(snapshot.idea_labels.is_empty());
}

#[tokio::test]
async fn switching_selection_is_blocked_after_idea_votes() {
    let coordinator = coordinator(Collaborators {
        grouper: Some(Arc::new(PartitionGrouper { k: 4 })),
        ..Collaborators::disabled()
    })
    .await;
    let (session_id, owner_token, participants) =
        session_with_humans(&coordinator, &["Ada"]).await;
    coordinator.start(session_id, owner_token).await.unwrap();
    coordinator
        .submit_ideas(session_id, participants[0], batch("p0", 1))
        .await
        .unwrap();
    for _ in 1..=6 {
        coordinator.advance_round(session_id, owner_token, true).await.unwrap();
    }
    let clusters = coordinator
        .generate_clusters(session_id, owner_token, false)
        .await
        .unwrap();

    coordinator.select_cluster(session_id, owner_token, "c1").await.unwrap();
    // Re-selecting the same cluster is idempotent
    coordinator.select_cluster(session_id, owner_token, "c1").await.unwrap();
    // Switching is still allowed before any idea vote
    coordinator.select_cluster(session_id, owner_token, "c2").await.unwrap();

    let idea = clusters.iter().find(|c| c.id == "c2").unwrap().member_idea_ids[0].clone();
    coordinator
        .submit_vote(
            session_id,
            participants[0],
            VotePhase::Idea,
            points(&[(idea.as_str(), 3)]),
        )
        .await
        .unwrap();

    let err = coordinator
        .select_cluster(session_id, owner_token, "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)));
}

#[tokio::test]
async fn owner_credential_is_enforced() {
    let coordinator = coordinator(Collaborators::disabled()).await;
    let (session_id, _owner_token, _) = session_with_humans(&coordinator, &["Ada"]).await;

    let err = coordinator.start(session_id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::NotAuthorized(_)));
    let err = coordinator
        .add_ai_participant(session_id, Uuid::new_v4(), "Scribe")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotAuthorized(_)));
}

#[tokio::test]
async fn restored_coordinator_reconstructs_state() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ideaforge.db");
    let pool = ideaforge_ws::db::init_database_pool(&db_path).await.unwrap();
    let coordinator = Arc::new(Coordinator::new(
        pool.clone(),
        EventBus::new(256),
        Collaborators {
            grouper: Some(Arc::new(PartitionGrouper { k: 4 })),
            ..Collaborators::disabled()
        },
    ));

    let (session_id, owner_token) = coordinator.create_session().await.unwrap();
    coordinator.set_step(session_id, owner_token, 2).await.unwrap();
    let ada = coordinator.join(session_id, "Ada").await.unwrap();
    let grace = coordinator.join(session_id, "Grace").await.unwrap();
    coordinator
        .set_context(session_id, owner_token, "family-run metal workshop".into())
        .await
        .unwrap();
    coordinator.start(session_id, owner_token).await.unwrap();
    coordinator.submit_ideas(session_id, ada, batch("a", 1)).await.unwrap();
    coordinator.submit_ideas(session_id, grace, batch("g", 1)).await.unwrap();
    for _ in 1..=6 {
        coordinator.advance_round(session_id, owner_token, true).await.unwrap();
    }
    coordinator.generate_clusters(session_id, owner_token, false).await.unwrap();
    coordinator
        .submit_vote(session_id, ada, VotePhase::Cluster, points(&[("c1", 2), ("c2", 1)]))
        .await
        .unwrap();
    coordinator.select_cluster(session_id, owner_token, "c1").await.unwrap();

    let before = coordinator.snapshot(session_id).await.unwrap();

    // Simulated restart: close the pool, reopen the same file
    drop(coordinator);
    pool.close().await;
    let pool = ideaforge_ws::db::init_database_pool(&db_path).await.unwrap();
    let restored = Arc::new(Coordinator::new(
        pool,
        EventBus::new(256),
        Collaborators::disabled(),
    ));
    assert_eq!(restored.restore().await.unwrap(), 1);

    let after = restored.snapshot(session_id).await.unwrap();
    assert_eq!(
        serde_json::to_value(&before.status).unwrap(),
        serde_json::to_value(&after.status).unwrap()
    );
    assert_eq!(
        serde_json::to_value(&before.ideas).unwrap(),
        serde_json::to_value(&after.ideas).unwrap()
    );
    assert_eq!(
        serde_json::to_value(&before.clusters).unwrap(),
        serde_json::to_value(&after.clusters).unwrap()
    );
    assert_eq!(before.last_seq, after.last_seq);

    // Event history survives, so since-replay works across restarts
    let events = restored.events_since(session_id, 0).await.unwrap();
    assert_eq!(events.last().unwrap().seq, after.last_seq);

    // The restored session keeps enforcing the frozen registry
    let err = restored.join(session_id, "Late").await.unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)));
}
