//! API error taxonomy and its HTTP mapping.
//!
//! Internal detail never reaches a response body: `Internal` logs the cause
//! and answers with a generic message, everything else carries text that is
//! safe to expose.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use tether_core::{RunStatus, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request syntax.
    #[error("invalid JSON")]
    BadRequest,

    /// Well-formed request that violates the schema.
    #[error("invalid request body: {0}")]
    Validation(String),

    /// Lookup miss.
    #[error("run not found")]
    NotFound,

    /// Operation valid only in a specific run state.
    #[error("run is {status}")]
    StateConflict { status: RunStatus },

    /// Unique-constraint collision that admission could not recover from.
    #[error("conflict during creation")]
    Conflict,

    /// Store, queue, or sink failure; safe for the client to retry.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::KeyAlreadyBound { .. } => ApiError::Conflict,
            StoreError::Backend(cause) => ApiError::Internal(cause),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, body) = match &self {
            ApiError::BadRequest => (StatusCode::BAD_REQUEST, json!({"error": "Invalid JSON"})),
            ApiError::Validation(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({"error": "Invalid request body", "details": detail}),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({"error": "Run not found"})),
            ApiError::StateConflict { status } => (
                StatusCode::CONFLICT,
                json!({"error": "Result not available", "status": status}),
            ),
            ApiError::Conflict => (
                StatusCode::CONFLICT,
                json!({"error": "Conflict during creation"}),
            ),
            ApiError::Internal(cause) => {
                tracing::error!(error = %cause, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal Server Error"}),
                )
            }
        };

        (code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let err: ApiError = StoreError::KeyAlreadyBound {
            key: "K".to_string(),
        }
        .into();
        assert!(matches!(err, ApiError::Conflict));
    }

    #[test]
    fn test_state_conflict_body_carries_current_status() {
        let response = ApiError::StateConflict {
            status: RunStatus::Pending,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
