//! Execution seams: the model runner and the result sink.
//!
//! Both are capabilities behind a contract; implementations are
//! interchangeable and the control plane never depends on their internals.

use anyhow::Result;
use serde_json::Value;
use uuid::Uuid;

/// Executes the model logic for a parameter set.
#[async_trait::async_trait]
pub trait ModelRunner: Send + Sync {
    /// Run the model. The result is any JSON-serializable structure; an
    /// error becomes the run's `last_error` and a `Failed` terminal state.
    async fn run(&self, parameters: &Value) -> Result<Value>;
}

/// Durably stores a run's result and returns an opaque reference string.
#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    /// Store `result` for `run_id`. Must be at-least-once safe: calling
    /// again with the same `run_id` yields an equivalent reference.
    async fn put(&self, run_id: Uuid, result: &Value) -> Result<String>;
}
