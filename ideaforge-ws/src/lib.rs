//! ideaforge-ws library - Workshop coordinator service
//!
//! Hosts the 6-3-5 brainwriting session coordinator and the two-phase
//! prioritization pipeline behind an HTTP + SSE surface.

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod api;
pub mod db;
pub mod error;
pub mod llm;
pub mod session;

pub use session::Coordinator;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

/// Build application router
///
/// Credential checks (owner token vs. participant handle) happen in the
/// coordinator, not in middleware: which credential a route needs
/// depends on the operation, and reads need none beyond the session
/// handle itself.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health::health))
        .route("/api/session", post(api::sessions::create_session))
        .route("/api/session/:id/join", post(api::sessions::join))
        .route("/api/session/:id/participants", get(api::sessions::list_participants))
        .route("/api/session/:id/participants/ai", post(api::sessions::add_ai_participant))
        .route("/api/session/:id/context", put(api::sessions::set_context))
        .route("/api/session/:id/step", post(api::sessions::set_step))
        .route("/api/session/:id/start", post(api::sessions::start))
        .route("/api/session/:id/skip", post(api::sessions::skip))
        .route("/api/session/:id/advance", post(api::sessions::advance))
        .route("/api/session/:id/leave", post(api::sessions::leave))
        .route("/api/session/:id/status", get(api::sessions::get_status))
        .route(
            "/api/session/:id/ideas",
            post(api::ideas::submit_ideas).get(api::ideas::list_ideas),
        )
        .route("/api/session/:id/ideas/ai", post(api::ideas::request_ai_ideas))
        .route(
            "/api/session/:id/clusters",
            post(api::clusters::generate).get(api::clusters::list),
        )
        .route("/api/session/:id/clusters/select", post(api::clusters::select))
        .route("/api/session/:id/clusters/assess", post(api::clusters::assess))
        .route(
            "/api/session/:id/votes/cluster",
            post(api::votes::submit_cluster_vote).get(api::votes::cluster_results),
        )
        .route(
            "/api/session/:id/votes/idea",
            post(api::votes::submit_idea_vote).get(api::votes::idea_results),
        )
        .route("/api/session/:id/events", get(api::sse::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
