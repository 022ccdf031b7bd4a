//! Error types for ideaforge-ws

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ideaforge_common::Error as CoreError;
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Coordinator error, mapped onto HTTP by taxonomy
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Malformed request at the HTTP layer (bad bearer token, bad path)
    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID", msg.clone()),
            ApiError::Core(err) => {
                let status = match err {
                    CoreError::PreconditionFailed(_) => StatusCode::CONFLICT,
                    CoreError::Invalid(_) => StatusCode::BAD_REQUEST,
                    CoreError::NotAuthorized(_) => StatusCode::FORBIDDEN,
                    CoreError::Missing(_) => StatusCode::NOT_FOUND,
                    CoreError::ExternalUnavailable(_) => StatusCode::BAD_GATEWAY,
                    CoreError::Conflict(_) => {
                        // Single-writer invariant violated somewhere
                        tracing::error!(error = %err, "conflict inside session critical section");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code(), err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
