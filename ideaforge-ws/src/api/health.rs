//! Health endpoint with build identification

use axum::Json;
use serde_json::{json, Value};

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "ideaforge-ws",
        "version": env!("CARGO_PKG_VERSION"),
        "git_hash": env!("GIT_HASH"),
        "built": env!("BUILD_TIMESTAMP"),
        "profile": env!("BUILD_PROFILE"),
    }))
}
