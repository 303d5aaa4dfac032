//! Run admission and inspection endpoints.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use tether_core::{Run, RunStatus};

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
struct CreateRunRequest {
    parameters: Map<String, Value>,
}

/// The client-visible run shape. Lease internals, the payload hash, and the
/// result reference stay out of it; results go through `/runs/{id}/result`.
#[derive(Debug, Serialize)]
pub struct RunBody {
    pub id: Uuid,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub parameters: Value,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
}

impl From<Run> for RunBody {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            status: run.status,
            created_at: run.created_at,
            parameters: run.parameters,
            started_at: run.started_at,
            finished_at: run.finished_at,
            attempt_count: run.attempt_count,
        }
    }
}

/// `POST /runs`
///
/// `201` with the new run, or `200` with the run an earlier equivalent
/// request created. The body is parsed in two steps so malformed syntax maps
/// to `400` while schema violations map to `422`.
pub async fn create_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let value: Value = serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest)?;
    let request: CreateRunRequest =
        serde_json::from_value(value).map_err(|e| ApiError::Validation(e.to_string()))?;

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok());

    let (run, newly_created) = state
        .admission
        .admit(request.parameters, idempotency_key)
        .await?;

    let code = if newly_created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((code, Json(RunBody::from(run))))
}

/// `GET /runs/{id}`
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunBody>, ApiError> {
    let run = state.store.get(id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(RunBody::from(run)))
}

#[derive(Debug, Serialize)]
struct RunResultBody {
    run_id: Uuid,
    result_reference: Option<String>,
}

/// `GET /runs/{id}/result`
///
/// The reference is only handed out once the run has succeeded; any other
/// state answers `409` with the current status.
pub async fn get_run_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.store.get(id).await?.ok_or(ApiError::NotFound)?;

    if run.status != RunStatus::Succeeded {
        return Err(ApiError::StateConflict { status: run.status });
    }

    Ok(Json(RunResultBody {
        run_id: run.id,
        result_reference: run.result_ref,
    }))
}
