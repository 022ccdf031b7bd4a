//! Cluster handlers: generation, listing, selection, assessment

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use ideaforge_common::api::types::{Ack, GenerateClustersRequest, SelectClusterRequest};
use ideaforge_common::model::{Cluster, IdeaLabel};
use serde::Serialize;
use uuid::Uuid;

use super::bearer_token;
use crate::error::ApiResult;
use crate::AppState;

/// POST /api/session/:id/clusters (owner)
pub async fn generate(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    body: Option<Json<GenerateClustersRequest>>,
) -> ApiResult<Json<Vec<Cluster>>> {
    let token = bearer_token(&headers)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let clusters = state
        .coordinator
        .generate_clusters(session_id, token, request.regenerate)
        .await?;
    Ok(Json(clusters))
}

/// GET /api/session/:id/clusters
pub async fn list(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Cluster>>> {
    Ok(Json(state.coordinator.list_clusters(session_id).await?))
}

/// POST /api/session/:id/clusters/select (owner)
pub async fn select(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<SelectClusterRequest>,
) -> ApiResult<Json<Ack>> {
    let token = bearer_token(&headers)?;
    state
        .coordinator
        .select_cluster(session_id, token, &request.cluster_id)
        .await?;
    Ok(Json(Ack::ok()))
}

/// Assessment outcome: labels may be empty when the external labeller
/// is unavailable (soft failure)
#[derive(Debug, Serialize)]
pub struct AssessResponse {
    pub assessed: bool,
    pub labels: Vec<IdeaLabel>,
}

/// POST /api/session/:id/clusters/assess (owner)
pub async fn assess(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<AssessResponse>> {
    let token = bearer_token(&headers)?;
    let labels = state.coordinator.assess_cluster(session_id, token).await?;
    Ok(Json(AssessResponse { assessed: !labels.is_empty(), labels }))
}
