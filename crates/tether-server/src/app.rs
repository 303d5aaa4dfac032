//! Router and shared application state.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use tether_core::{Probe, RunStore};

use crate::admission::AdmissionService;
use crate::routes;

/// Request-handler timeout; admission is short-lived by design.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RunStore>,
    pub admission: Arc<AdmissionService>,
    pub probes: Arc<Vec<Arc<dyn Probe>>>,
}

/// Build the HTTP surface over an already-wired state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/runs", post(routes::create_run))
        .route("/runs/:id", get(routes::get_run))
        .route("/runs/:id/result", get(routes::get_run_result))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
