//! Idea handlers: participant submissions, AI-surrogate batches, listing

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use ideaforge_common::api::types::{Ack, AiIdeasRequest, AiIdeasResponse, SubmitIdeasRequest};
use ideaforge_common::model::Idea;
use uuid::Uuid;

use super::bearer_token;
use crate::error::ApiResult;
use crate::AppState;

/// POST /api/session/:id/ideas (participant)
pub async fn submit_ideas(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<SubmitIdeasRequest>,
) -> ApiResult<Json<Ack>> {
    let participant_id = bearer_token(&headers)?;
    state
        .coordinator
        .submit_ideas(session_id, participant_id, request.ideas)
        .await?;
    Ok(Json(Ack::ok()))
}

/// POST /api/session/:id/ideas/ai (owner, acting for the AI surrogate)
pub async fn request_ai_ideas(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AiIdeasRequest>,
) -> ApiResult<Json<AiIdeasResponse>> {
    let token = bearer_token(&headers)?;
    let (ideas, cached) = state
        .coordinator
        .request_ai_ideas(session_id, token, request.participant_id)
        .await?;
    Ok(Json(AiIdeasResponse { ideas, cached }))
}

/// GET /api/session/:id/ideas
pub async fn list_ideas(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Idea>>> {
    Ok(Json(state.coordinator.list_ideas(session_id).await?))
}
