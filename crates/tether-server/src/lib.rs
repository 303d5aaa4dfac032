//! Admission service and HTTP API for the tether control plane.
//!
//! Admission turns a possibly-duplicate client request into at most one
//! durable run: explicit idempotency-key lookup first, then implicit
//! deduplication by payload hash, then a single-transaction create, and only
//! after commit a best-effort queue hint. The HTTP layer is a thin axum
//! surface over that algorithm plus read-only inspection and health.

pub mod admission;
pub mod app;
pub mod error;
pub mod routes;

pub use admission::AdmissionService;
pub use app::{router, AppState};
pub use error::ApiError;
