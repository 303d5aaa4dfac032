//! Run execution: lease, heartbeat, model, sink, finalize.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use tether_core::{ModelRunner, ResultSink, RunStore};

use crate::heartbeat::Heartbeat;
use crate::runner::RunnerRegistry;

/// Worker identity, stable for the lifetime of the process.
///
/// `host-pid-nonce` keeps restarted processes distinct even when the OS
/// reuses a pid.
pub fn worker_identity() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{host}-{}-{:08x}", std::process::id(), fastrand::u32(..))
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub worker_id: String,
    pub lease_ttl: ChronoDuration,
    pub heartbeat_interval: Duration,
    pub job_timeout: Duration,
    pub max_attempts: i32,
}

/// Executes one run at a time under a lease.
///
/// Everything here is fail-silent on lease loss: a denied conditional update
/// means another owner has the run, and this worker must not write again.
pub struct Executor {
    store: Arc<dyn RunStore>,
    runners: RunnerRegistry,
    sink: Arc<dyn ResultSink>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        store: Arc<dyn RunStore>,
        runners: RunnerRegistry,
        sink: Arc<dyn ResultSink>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            runners,
            sink,
            config,
        }
    }

    /// Attempt the run named by a hint or scan result.
    ///
    /// Returns `Ok` both on completion and on a quiet no-op (lease denied,
    /// run already terminal). Errors are store-transport failures; the
    /// caller may log them and rely on lease expiry for recovery.
    pub async fn execute(&self, run_id: Uuid) -> Result<()> {
        let worker_id = &self.config.worker_id;
        let now = Utc::now();

        if self
            .store
            .mark_exhausted(run_id, self.config.max_attempts, now)
            .await?
        {
            tracing::warn!(
                run_id = %run_id,
                max_attempts = self.config.max_attempts,
                "run failed without acquiring: attempts exhausted"
            );
            return Ok(());
        }

        if !self
            .store
            .try_acquire_lease(run_id, worker_id, now, self.config.lease_ttl)
            .await?
        {
            tracing::debug!(run_id = %run_id, worker_id = %worker_id, "lease denied");
            return Ok(());
        }
        tracing::info!(run_id = %run_id, worker_id = %worker_id, "lease acquired");

        let heartbeat = Heartbeat::spawn(
            self.store.clone(),
            run_id,
            worker_id.clone(),
            self.config.heartbeat_interval,
            self.config.lease_ttl,
        );

        let outcome = self.run_leased(run_id, &heartbeat).await;
        heartbeat.stop().await;
        outcome
    }

    async fn run_leased(&self, run_id: Uuid, heartbeat: &Heartbeat) -> Result<()> {
        let worker_id = &self.config.worker_id;

        let Some(run) = self.store.get(run_id).await? else {
            tracing::error!(run_id = %run_id, "leased run vanished from the store");
            return Ok(());
        };

        let runner = self.runners.select(&run.parameters);
        let result = match tokio::time::timeout(
            self.config.job_timeout,
            runner.run(&run.parameters),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!(run_id = %run_id, error = %e, "model run failed");
                self.finalize_failure(run_id, &format!("model run failed: {e:#}"))
                    .await?;
                return Ok(());
            }
            Err(_) => {
                // No finalization: the run stays leased until the lease
                // expires naturally, and then becomes reclaimable.
                tracing::warn!(
                    run_id = %run_id,
                    timeout_secs = self.config.job_timeout.as_secs(),
                    "model run timed out, abandoning without finalizing"
                );
                return Ok(());
            }
        };

        let result_ref = match self.sink.put(run_id, &result).await {
            Ok(result_ref) => result_ref,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "result sink failed");
                self.finalize_failure(run_id, &format!("result sink failed: {e:#}"))
                    .await?;
                return Ok(());
            }
        };

        if heartbeat.lease_lost() {
            tracing::warn!(run_id = %run_id, "lease lost during execution, dropping result");
            return Ok(());
        }

        if self
            .store
            .finalize_success(run_id, worker_id, &result_ref, Utc::now())
            .await?
        {
            tracing::info!(run_id = %run_id, result_ref = %result_ref, "run succeeded");
        } else {
            tracing::warn!(run_id = %run_id, "finalize denied, another owner holds the run");
        }

        Ok(())
    }

    /// Conditional failure; a denial means the lease moved on and the row is
    /// left for the next owner.
    async fn finalize_failure(&self, run_id: Uuid, error: &str) -> Result<()> {
        if self
            .store
            .finalize_failure(run_id, &self.config.worker_id, error, Utc::now())
            .await?
        {
            tracing::info!(run_id = %run_id, error, "run failed");
        } else {
            tracing::warn!(run_id = %run_id, "failure finalize denied, leaving row for next owner");
        }
        Ok(())
    }
}
