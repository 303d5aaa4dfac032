//! Health check endpoint.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    dependencies: BTreeMap<String, String>,
}

/// `GET /healthz`
///
/// Runs every registered dependency probe under a short timeout. Returns
/// 200 `{"status":"ok",...}` when all pass, 503 `{"status":"degraded",...}`
/// with per-dependency markers otherwise.
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let mut dependencies = BTreeMap::new();
    let mut degraded = false;

    for probe in state.probes.iter() {
        let verdict = match tokio::time::timeout(PROBE_TIMEOUT, probe.check()).await {
            Ok(Ok(())) => "ok",
            Ok(Err(e)) => {
                tracing::error!(dependency = probe.name(), error = %e, "health check failed");
                degraded = true;
                "error"
            }
            Err(_) => {
                tracing::error!(dependency = probe.name(), "health check timed out");
                degraded = true;
                "error"
            }
        };
        dependencies.insert(probe.name().to_string(), verdict.to_string());
    }

    let (code, status) = if degraded {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };

    (code, Json(HealthResponse { status, dependencies }))
}
