//! HTTP API handlers for ideaforge-ws

pub mod clusters;
pub mod health;
pub mod ideas;
pub mod sessions;
pub mod sse;
pub mod votes;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use uuid::Uuid;

use crate::error::ApiError;

/// Extract the bearer credential (owner token or participant handle)
pub fn bearer_token(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing Authorization header".into()))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::BadRequest("expected Bearer authorization".into()))?;
    Uuid::parse_str(token.trim())
        .map_err(|_| ApiError::BadRequest("malformed bearer token".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", id)).unwrap(),
        );
        assert_eq!(bearer_token(&headers).unwrap(), id);

        let mut bad = HeaderMap::new();
        bad.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&bad).is_err());

        assert!(bearer_token(&HeaderMap::new()).is_err());
    }
}
