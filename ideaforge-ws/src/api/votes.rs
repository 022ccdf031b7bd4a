//! Voting handlers for both prioritization phases

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use ideaforge_common::api::types::{Ack, VoteRequest};
use ideaforge_common::model::{Ranking, VotePhase};
use uuid::Uuid;

use super::bearer_token;
use crate::error::ApiResult;
use crate::AppState;

/// POST /api/session/:id/votes/cluster (participant)
pub async fn submit_cluster_vote(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<VoteRequest>,
) -> ApiResult<Json<Ack>> {
    let participant_id = bearer_token(&headers)?;
    state
        .coordinator
        .submit_vote(session_id, participant_id, VotePhase::Cluster, request.allocation)
        .await?;
    Ok(Json(Ack::ok()))
}

/// GET /api/session/:id/votes/cluster
pub async fn cluster_results(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Ranking>> {
    Ok(Json(state.coordinator.results(session_id, VotePhase::Cluster).await?))
}

/// POST /api/session/:id/votes/idea (participant)
pub async fn submit_idea_vote(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<VoteRequest>,
) -> ApiResult<Json<Ack>> {
    let participant_id = bearer_token(&headers)?;
    state
        .coordinator
        .submit_vote(session_id, participant_id, VotePhase::Idea, request.allocation)
        .await?;
    Ok(Json(Ack::ok()))
}

/// GET /api/session/:id/votes/idea
pub async fn idea_results(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Ranking>> {
    Ok(Json(state.coordinator.results(session_id, VotePhase::Idea).await?))
}
