//! Unified error handling with Sentry integration.
//!
//! Route handlers return `Result<T, AppError>`. Every error answers with a
//! JSON body: `{"detail": "..."}`, or the field map for validation errors.
//! Server errors are captured to Sentry before responding.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::admin::AdminError;
use crate::db::RepositoryError;
use crate::serializers::{SerializerError, ValidationErrors};

/// Body detail for missing resources.
pub const NOT_FOUND: &str = "Not found.";

/// Application-level error type for the store API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(RepositoryError),

    /// Resource not found.
    #[error("Not found")]
    NotFound,

    /// Request body failed validation.
    #[error("Validation failed: {0:?}")]
    Validation(ValidationErrors),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A delete is blocked by rows still referencing the resource.
    #[error("Referential conflict: {0}")]
    ReferentialConflict(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            RepositoryError::Protected(detail) => Self::ReferentialConflict(detail),
            RepositoryError::Conflict(detail) | RepositoryError::Integrity(detail) => {
                Self::BadRequest(detail)
            }
            other => Self::Database(other),
        }
    }
}

impl From<SerializerError> for AppError {
    fn from(err: SerializerError) -> Self {
        match err {
            SerializerError::Invalid(errors) => Self::Validation(errors),
            SerializerError::Repository(err) => err.into(),
        }
    }
}

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::UnknownAction(_) => Self::NotFound,
            AdminError::Invalid(errors) => Self::Validation(errors),
            AdminError::Repository(err) => err.into(),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if matches!(self, Self::Database(_) | Self::Internal(_)) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ReferentialConflict(_) => StatusCode::METHOD_NOT_ALLOWED,
        };

        // Don't expose internal error details to clients
        let body = match self {
            Self::Validation(errors) => json!(errors),
            Self::Database(_) | Self::Internal(_) => json!({"detail": "Internal server error"}),
            Self::NotFound => json!({ "detail": NOT_FOUND }),
            Self::BadRequest(detail) | Self::ReferentialConflict(detail) => {
                json!({ "detail": detail })
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
        assert_eq!(AppError::NotFound.to_string(), "Not found");
    }

    #[tokio::test]
    async fn test_repository_errors_map_to_statuses() {
        let (status, json) = body(RepositoryError::NotFound.into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json, json!({"detail": "Not found."}));

        let (status, json) = body(RepositoryError::Protected("in use".into()).into()).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json, json!({"detail": "in use"}));

        let (status, json) =
            body(RepositoryError::InvalidQuery("select * from secrets".into()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json, json!({"detail": "Internal server error"}));
    }

    #[tokio::test]
    async fn test_validation_body_is_field_map() {
        let mut errors = ValidationErrors::new();
        errors.add("title", "This field is required.");
        let (status, json) = body(SerializerError::Invalid(errors).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, json!({"title": ["This field is required."]}));
    }
}
