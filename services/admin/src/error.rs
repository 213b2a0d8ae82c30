//! Error types for the admin service

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use common::error::DatabaseError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::models::UnknownPlatform;

/// Failures of the certificate link subsystem
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("link not found")]
    NotFound,

    #[error("link expired")]
    Expired,

    /// Password not yet verified for this link in this session
    #[error("link password not verified")]
    Unauthorized,

    #[error("invalid platform: {0}")]
    InvalidPlatform(String),

    #[error("certificate artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("store failure: {0}")]
    Store(#[from] DatabaseError),

    #[error("session store failure: {0}")]
    SessionStore(anyhow::Error),
}

impl From<UnknownPlatform> for LinkError {
    fn from(err: UnknownPlatform) -> Self {
        LinkError::InvalidPlatform(err.0)
    }
}

/// Custom error type for the HTTP layer
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    /// Unknown and expired links share this response
    #[error("Link is invalid or has expired")]
    LinkInvalid,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Password required")]
    PasswordRequired,

    #[error("Too many attempts")]
    TooManyRequests { retry_after: u64 },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The external provisioning tool failed
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Internal server error")]
    InternalServerError,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<LinkError> for ApiError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::NotFound | LinkError::Expired => ApiError::LinkInvalid,
            LinkError::Unauthorized => ApiError::PasswordRequired,
            LinkError::InvalidPlatform(platform) => {
                ApiError::BadRequest(format!("Invalid platform: {}", platform))
            }
            LinkError::ArtifactMissing(_) => ApiError::NotFound("Certificate not found".to_string()),
            LinkError::Store(e) => ApiError::Database(e),
            LinkError::SessionStore(e) => {
                error!("Session store error: {}", e);
                ApiError::InternalServerError
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({"error": "Unauthorized"})),
            ApiError::LinkInvalid => (
                StatusCode::NOT_FOUND,
                json!({"view": "invalid", "error": "Link is invalid or has expired"}),
            ),
            ApiError::IncorrectPassword => (
                StatusCode::UNAUTHORIZED,
                json!({"view": "password_required", "error": "Incorrect password"}),
            ),
            ApiError::PasswordRequired => (
                StatusCode::UNAUTHORIZED,
                json!({"view": "password_required", "error": "Password required"}),
            ),
            ApiError::TooManyRequests { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({"error": "Too many attempts, try again later"}),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({"error": msg})),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({"error": msg})),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({"error": msg})),
            ApiError::Provisioning(msg) => (StatusCode::BAD_GATEWAY, json!({"error": msg})),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "Internal server error"}),
            ),
            ApiError::Database(e) => {
                error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal server error"}),
                )
            }
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::TooManyRequests { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_and_expired_are_indistinguishable() {
        let not_found = ApiError::from(LinkError::NotFound).into_response();
        let expired = ApiError::from(LinkError::Expired).into_response();
        assert_eq!(not_found.status(), expired.status());
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_failure_is_generic() {
        let err = ApiError::from(LinkError::Store(DatabaseError::Migration("boom".into())));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = ApiError::TooManyRequests { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }
}
