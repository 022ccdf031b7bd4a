//! Session lifecycle handlers: create, join, start, skip, advance,
//! step/context management, presence, and status

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use ideaforge_common::api::types::{
    Ack, AddAiParticipantRequest, AdvanceRequest, CreateSessionResponse, JoinRequest,
    JoinResponse, SetContextRequest, SetStepRequest,
};
use ideaforge_common::model::{Participant, SessionStatus};
use uuid::Uuid;

use super::bearer_token;
use crate::error::ApiResult;
use crate::AppState;

/// POST /api/session
pub async fn create_session(
    State(state): State<AppState>,
) -> ApiResult<Json<CreateSessionResponse>> {
    let (session_id, owner_token) = state.coordinator.create_session().await?;
    Ok(Json(CreateSessionResponse { session_id, owner_token }))
}

/// POST /api/session/:id/join
pub async fn join(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<Json<JoinResponse>> {
    let participant_id = state.coordinator.join(session_id, &request.display_name).await?;
    Ok(Json(JoinResponse { participant_id }))
}

/// POST /api/session/:id/participants/ai (owner)
pub async fn add_ai_participant(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AddAiParticipantRequest>,
) -> ApiResult<Json<JoinResponse>> {
    let token = bearer_token(&headers)?;
    let participant_id = state
        .coordinator
        .add_ai_participant(session_id, token, &request.display_name)
        .await?;
    Ok(Json(JoinResponse { participant_id }))
}

/// GET /api/session/:id/participants
pub async fn list_participants(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Participant>>> {
    Ok(Json(state.coordinator.list_participants(session_id).await?))
}

/// PUT /api/session/:id/context (owner)
pub async fn set_context(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<SetContextRequest>,
) -> ApiResult<Json<Ack>> {
    let token = bearer_token(&headers)?;
    state
        .coordinator
        .set_context(session_id, token, request.company_context)
        .await?;
    Ok(Json(Ack::ok()))
}

/// POST /api/session/:id/step (owner)
pub async fn set_step(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<SetStepRequest>,
) -> ApiResult<Json<Ack>> {
    let token = bearer_token(&headers)?;
    state.coordinator.set_step(session_id, token, request.step).await?;
    Ok(Json(Ack::ok()))
}

/// POST /api/session/:id/start (owner)
pub async fn start(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Ack>> {
    let token = bearer_token(&headers)?;
    state.coordinator.start(session_id, token).await?;
    Ok(Json(Ack::ok()))
}

/// POST /api/session/:id/skip (owner)
pub async fn skip(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Ack>> {
    let token = bearer_token(&headers)?;
    state.coordinator.skip(session_id, token).await?;
    Ok(Json(Ack::ok()))
}

/// POST /api/session/:id/advance (owner)
pub async fn advance(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    body: Option<Json<AdvanceRequest>>,
) -> ApiResult<Json<Ack>> {
    let token = bearer_token(&headers)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    state
        .coordinator
        .advance_round(session_id, token, request.force)
        .await?;
    Ok(Json(Ack::ok()))
}

/// POST /api/session/:id/leave (participant)
pub async fn leave(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Ack>> {
    let participant_id = bearer_token(&headers)?;
    state.coordinator.leave(session_id, participant_id).await?;
    Ok(Json(Ack::ok()))
}

/// GET /api/session/:id/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionStatus>> {
    Ok(Json(state.coordinator.status(session_id).await?))
}
