//! The admission protocol: at-least-once requests, at most one durable run.

use std::sync::Arc;

use anyhow::anyhow;
use serde_json::{Map, Value};
use uuid::Uuid;

use tether_core::{canonical_params, Run, RunQueue, RunStore};

use crate::error::ApiError;

/// Turns a parameter payload plus an optional idempotency key into the
/// unique run the client should observe.
pub struct AdmissionService {
    store: Arc<dyn RunStore>,
    queue: Arc<dyn RunQueue>,
}

impl AdmissionService {
    pub fn new(store: Arc<dyn RunStore>, queue: Arc<dyn RunQueue>) -> Self {
        Self { store, queue }
    }

    /// Admit a request. Returns the run and whether it was newly created.
    ///
    /// Resolution order:
    /// 1. Explicit idempotency key. The binding is authoritative: the stored
    ///    run's hash is not re-verified against this request's payload.
    /// 2. Implicit deduplication against any active run with the same
    ///    payload hash.
    /// 3. Transactional create (run insert + key binding). A concurrent
    ///    binding of the same key is resolved inside the store by returning
    ///    the winner.
    ///
    /// The queue hint goes out only after commit, and only best-effort: a
    /// failed enqueue is logged and the run is left for the dispatch scan.
    pub async fn admit(
        &self,
        parameters: Map<String, Value>,
        idempotency_key: Option<&str>,
    ) -> Result<(Run, bool), ApiError> {
        let (_, payload_hash) = canonical_params(&parameters).map_err(|_| ApiError::BadRequest)?;

        if let Some(key) = idempotency_key {
            if let Some(run_id) = self.store.find_by_idempotency_key(key).await? {
                let run = self.fetch_bound_run(key, run_id).await?;
                tracing::info!(key, run_id = %run.id, "admission hit idempotency key");
                return Ok((run, false));
            }
        }

        if let Some(run) = self.store.find_active_by_hash(&payload_hash).await? {
            tracing::info!(payload_hash = %payload_hash, run_id = %run.id, "admission hit active duplicate");
            return Ok((run, false));
        }

        let admission = self
            .store
            .admit_run(Value::Object(parameters), &payload_hash, idempotency_key)
            .await?;

        if admission.newly_created {
            if let Err(e) = self.queue.enqueue(admission.run.id).await {
                tracing::warn!(
                    run_id = %admission.run.id,
                    error = %e,
                    "enqueue failed, run left for the dispatch scan"
                );
            }
            tracing::info!(run_id = %admission.run.id, payload_hash = %payload_hash, "run admitted");
        }

        Ok((admission.run, admission.newly_created))
    }

    async fn fetch_bound_run(&self, key: &str, run_id: Uuid) -> Result<Run, ApiError> {
        self.store
            .get(run_id)
            .await?
            .ok_or_else(|| {
                ApiError::Internal(anyhow!(
                    "idempotency key {key:?} is bound to missing run {run_id}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_core::RunStatus;
    use tether_testing::{FailingQueue, MemoryRunStore, RecordingQueue};

    fn params(raw: &str) -> Map<String, Value> {
        match serde_json::from_str(raw).unwrap() {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn service_with_queue(
        queue: Arc<dyn RunQueue>,
    ) -> (Arc<MemoryRunStore>, AdmissionService) {
        let store = Arc::new(MemoryRunStore::new());
        let service = AdmissionService::new(store.clone(), queue);
        (store, service)
    }

    fn service() -> (Arc<MemoryRunStore>, Arc<RecordingQueue>, AdmissionService) {
        let store = Arc::new(MemoryRunStore::new());
        let queue = Arc::new(RecordingQueue::new());
        let service = AdmissionService::new(store.clone(), queue.clone());
        (store, queue, service)
    }

    #[tokio::test]
    async fn test_new_run_is_pending_and_enqueued() {
        let (_, queue, service) = service();

        let (run, created) = service
            .admit(params(r#"{"model":"test","x":1}"#), None)
            .await
            .unwrap();

        assert!(created);
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.attempt_count, 0);
        assert_eq!(queue.hints(), vec![run.id]);
    }

    #[tokio::test]
    async fn test_identical_payload_dedupes_implicitly() {
        let (_, queue, service) = service();
        let body = r#"{"unique":"implicit_test"}"#;

        let (first, created1) = service.admit(params(body), None).await.unwrap();
        let (second, created2) = service.admit(params(body), None).await.unwrap();

        assert!(created1);
        assert!(!created2);
        assert_eq!(first.id, second.id);
        // Only the creating admission hints the queue.
        assert_eq!(queue.hints().len(), 1);
    }

    #[tokio::test]
    async fn test_key_order_does_not_defeat_dedup() {
        let (_, _, service) = service();

        let (first, _) = service.admit(params(r#"{"a":1,"b":2}"#), None).await.unwrap();
        let (second, created) = service.admit(params(r#"{"b":2,"a":1}"#), None).await.unwrap();

        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_terminal_run_does_not_dedup() {
        let (store, _, service) = service();
        let body = r#"{"x":"rerun"}"#;

        let (first, _) = service.admit(params(body), None).await.unwrap();
        let now = chrono::Utc::now();
        assert!(store
            .try_acquire_lease(first.id, "w1", now, chrono::Duration::seconds(60))
            .await
            .unwrap());
        assert!(store.finalize_success(first.id, "w1", "ref", now).await.unwrap());

        let (second, created) = service.admit(params(body), None).await.unwrap();
        assert!(created);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_same_key_same_payload_returns_bound_run() {
        let (_, _, service) = service();
        let body = r#"{"x":"A"}"#;

        let (first, created1) = service.admit(params(body), Some("K")).await.unwrap();
        let (second, created2) = service.admit(params(body), Some("K")).await.unwrap();

        assert!(created1);
        assert!(!created2);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_key_wins_over_differing_payload() {
        let (_, _, service) = service();

        let (first, _) = service.admit(params(r#"{"x":"A"}"#), Some("K")).await.unwrap();
        let (second, created) = service.admit(params(r#"{"x":"B"}"#), Some("K")).await.unwrap();

        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_enqueue_failure_does_not_fail_admission() {
        let (store, service) = service_with_queue(Arc::new(FailingQueue));

        let (run, created) = service.admit(params(r#"{"x":1}"#), None).await.unwrap();

        assert!(created);
        // The run exists durably; the dispatch scan will find it.
        let stored = store.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Pending);
    }
}
