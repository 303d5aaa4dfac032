//! In-memory run store with the production CAS semantics.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use tether_core::{Admission, Run, RunStatus, RunStore, StatusCounts, StoreError};

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, Run>,
    keys: HashMap<String, Uuid>,
}

/// A `RunStore` backed by process memory.
///
/// Each operation takes the lock once, so multi-step operations (admission)
/// are as atomic as their transactional counterparts.
#[derive(Default)]
pub struct MemoryRunStore {
    inner: Mutex<Inner>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every run, for assertions.
    pub fn runs(&self) -> Vec<Run> {
        self.lock().runs.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("run store mutex poisoned")
    }

    fn fresh_run(parameters: Value, payload_hash: &str) -> Run {
        Run {
            id: Uuid::new_v4(),
            status: RunStatus::Pending,
            parameters,
            payload_hash: payload_hash.to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            attempt_count: 0,
            lease_owner: None,
            lease_expires_at: None,
            result_ref: None,
            last_error: None,
        }
    }
}

/// `status = PENDING OR (status = RUNNING AND lease_expires_at < now)`
fn acquirable(run: &Run, now: DateTime<Utc>) -> bool {
    match run.status {
        RunStatus::Pending => true,
        RunStatus::Running => matches!(run.lease_expires_at, Some(expires) if expires < now),
        _ => false,
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn insert_run(&self, parameters: Value, payload_hash: &str) -> Result<Run, StoreError> {
        let run = Self::fresh_run(parameters, payload_hash);
        self.lock().runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.lock().runs.get(&id).cloned())
    }

    async fn find_active_by_hash(&self, payload_hash: &str) -> Result<Option<Run>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .runs
            .values()
            .filter(|run| run.payload_hash == payload_hash && run.is_active())
            .min_by_key(|run| (run.created_at, run.id))
            .cloned())
    }

    async fn bind_idempotency_key(&self, key: &str, run_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.keys.contains_key(key) {
            return Err(StoreError::KeyAlreadyBound {
                key: key.to_string(),
            });
        }
        inner.keys.insert(key.to_string(), run_id);
        Ok(())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self.lock().keys.get(key).copied())
    }

    async fn admit_run(
        &self,
        parameters: Value,
        payload_hash: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Admission, StoreError> {
        let mut inner = self.lock();

        if let Some(key) = idempotency_key {
            if let Some(&winner_id) = inner.keys.get(key) {
                let winner = inner.runs.get(&winner_id).cloned().ok_or_else(|| {
                    StoreError::Backend(anyhow!(
                        "idempotency key {key:?} is bound to missing run {winner_id}"
                    ))
                })?;
                return Ok(Admission {
                    run: winner,
                    newly_created: false,
                });
            }
        }

        let run = Self::fresh_run(parameters, payload_hash);
        if let Some(key) = idempotency_key {
            inner.keys.insert(key.to_string(), run.id);
        }
        inner.runs.insert(run.id, run.clone());

        Ok(Admission {
            run,
            newly_created: true,
        })
    }

    async fn try_acquire_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(run) = inner.runs.get_mut(&id) else {
            return Ok(false);
        };
        if !acquirable(run, now) {
            return Ok(false);
        }

        run.status = RunStatus::Running;
        run.lease_owner = Some(worker_id.to_string());
        run.lease_expires_at = Some(now + ttl);
        run.started_at = run.started_at.or(Some(now));
        run.attempt_count += 1;
        Ok(true)
    }

    async fn try_renew_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(run) = inner.runs.get_mut(&id) else {
            return Ok(false);
        };
        if run.status != RunStatus::Running || run.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }

        run.lease_expires_at = Some(now + ttl);
        Ok(true)
    }

    async fn finalize_success(
        &self,
        id: Uuid,
        worker_id: &str,
        result_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(run) = inner.runs.get_mut(&id) else {
            return Ok(false);
        };
        if run.status != RunStatus::Running || run.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }

        run.status = RunStatus::Succeeded;
        run.result_ref = Some(result_ref.to_string());
        run.finished_at = Some(now);
        Ok(true)
    }

    async fn finalize_failure(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(run) = inner.runs.get_mut(&id) else {
            return Ok(false);
        };
        if run.status != RunStatus::Running || run.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }

        run.status = RunStatus::Failed;
        run.last_error = Some(error.to_string());
        run.finished_at = Some(now);
        Ok(true)
    }

    async fn force_failure(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(run) = inner.runs.get_mut(&id) {
            if !run.is_terminal() {
                run.status = RunStatus::Failed;
                run.last_error = Some(error.to_string());
                run.finished_at = Some(now);
            }
        }
        Ok(())
    }

    async fn mark_exhausted(
        &self,
        id: Uuid,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(run) = inner.runs.get_mut(&id) else {
            return Ok(false);
        };
        if !acquirable(run, now) || run.attempt_count < max_attempts {
            return Ok(false);
        }

        run.status = RunStatus::Failed;
        run.last_error = Some("attempts exhausted".to_string());
        run.finished_at = Some(now);
        Ok(true)
    }

    async fn list_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.lock();
        let mut dispatchable: Vec<&Run> = inner
            .runs
            .values()
            .filter(|run| acquirable(run, now))
            .collect();
        dispatchable.sort_by_key(|run| (run.created_at, run.id));

        Ok(dispatchable
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|run| run.id)
            .collect())
    }

    async fn counts(&self) -> Result<StatusCounts, StoreError> {
        let inner = self.lock();
        let mut counts = StatusCounts::default();
        for run in inner.runs.values() {
            match run.status {
                RunStatus::Pending => counts.pending += 1,
                RunStatus::Running => counts.running += 1,
                RunStatus::Succeeded => counts.succeeded += 1,
                RunStatus::Failed => counts.failed += 1,
                RunStatus::Cancelled => counts.cancelled += 1,
            }
        }
        Ok(counts)
    }
}
