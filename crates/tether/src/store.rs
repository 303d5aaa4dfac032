//! The run store seam: durable, transactional authority for run state.
//!
//! Every state transition is a conditional update; the boolean results of the
//! lease and finalize operations are the CAS verdicts workers act on. A
//! `false` means the row no longer satisfied the condition (someone else owns
//! it, or it went terminal) and the caller must not retry unconditionally.
//!
//! # Implementer Notes
//!
//! - A row-level conditional `UPDATE ... WHERE ... RETURNING` is sufficient
//!   for every operation here; no advisory or range locks
//! - `admit_run` must insert the run and bind the idempotency key in one
//!   transaction, and resolve key collisions by re-reading the winner
//! - Reads must never surface partially updated rows (standard row-level
//!   read consistency)

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::run::Run;

/// Errors surfaced by run store operations.
///
/// `Backend` is the transport for infrastructure failures (connection loss,
/// malformed rows); callers treat it as retryable. `KeyAlreadyBound` is the
/// one conflict admission recovers from by re-reading.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The idempotency key is already bound to a run.
    #[error("idempotency key {key:?} is already bound")]
    KeyAlreadyBound { key: String },

    /// The store itself failed; safe to retry.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Outcome of a transactional admission.
#[derive(Debug, Clone)]
pub struct Admission {
    pub run: Run,
    /// `false` when a concurrent admission won the idempotency-key race and
    /// `run` is the winner's row.
    pub newly_created: bool,
}

/// Per-status row totals, for operational logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub pending: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// Durable, transactional record of runs and idempotency bindings.
///
/// The store is the sole system of record. Queue hints and in-memory
/// snapshots carry no authority.
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new `Pending` run with `attempt_count = 0`.
    ///
    /// `created_at` is set by the store's clock.
    async fn insert_run(&self, parameters: Value, payload_hash: &str) -> Result<Run, StoreError>;

    /// Fetch a run by id.
    async fn get(&self, id: Uuid) -> Result<Option<Run>, StoreError>;

    /// Find an active (`Pending` or `Running`) run with this payload hash.
    ///
    /// When duplicates exist (possible under keyless admission races), the
    /// earliest by `created_at` wins.
    async fn find_active_by_hash(&self, payload_hash: &str) -> Result<Option<Run>, StoreError>;

    /// Bind an idempotency key to a run.
    ///
    /// Fails with [`StoreError::KeyAlreadyBound`] if the key exists. A
    /// binding, once written, is immutable.
    async fn bind_idempotency_key(&self, key: &str, run_id: Uuid) -> Result<(), StoreError>;

    /// Look up the run bound to an idempotency key.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Uuid>, StoreError>;

    /// Insert a run and optionally bind an idempotency key, in one
    /// transaction.
    ///
    /// If the binding collides with a concurrent admission, the transaction
    /// rolls back and the winner's run is returned with
    /// `newly_created = false`.
    async fn admit_run(
        &self,
        parameters: Value,
        payload_hash: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Admission, StoreError>;

    /// Try to acquire the execution lease.
    ///
    /// Succeeds iff `status = Pending` OR (`status = Running` AND
    /// `lease_expires_at < now`). On success the row becomes `Running` owned
    /// by `worker_id` with `lease_expires_at = now + ttl`,
    /// `started_at = coalesce(started_at, now)`, and `attempt_count + 1`.
    async fn try_acquire_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Extend the lease; succeeds iff `worker_id` still owns a `Running` row.
    async fn try_renew_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Finalize as `Succeeded` with a result reference; owner-conditional.
    async fn finalize_success(
        &self,
        id: Uuid,
        worker_id: &str,
        result_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Finalize as `Failed` with an error message; owner-conditional.
    async fn finalize_failure(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Unconditional failure for catastrophic paths where ownership cannot
    /// be re-verified. Terminal rows are left untouched. Callers must prefer
    /// the conditional form.
    async fn force_failure(&self, id: Uuid, error: &str, now: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Fail a claimable run whose attempts are exhausted.
    ///
    /// Succeeds iff the row would be acquirable (`Pending`, or `Running`
    /// with an expired lease) AND `attempt_count >= max_attempts`; sets
    /// `Failed` with `last_error = "attempts exhausted"`.
    async fn mark_exhausted(
        &self,
        id: Uuid,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Ids of runs a worker should attempt: `Pending` rows plus `Running`
    /// rows whose lease expired before `now`, oldest first.
    async fn list_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Per-status totals.
    async fn counts(&self) -> Result<StatusCounts, StoreError>;
}
