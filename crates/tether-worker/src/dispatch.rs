//! The dispatch loop: queue hints merged with the recovery scan.
//!
//! Hints give low latency; the scan gives liveness. Either source alone is
//! enough for correctness because the executor re-admits every run through
//! lease acquisition.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use tether_core::{RunFeed, RunStore};

use crate::executor::Executor;

/// Upper bound on runs picked up per scan tick.
const SCAN_BATCH: i64 = 32;

pub struct Dispatcher {
    store: Arc<dyn RunStore>,
    executor: Arc<Executor>,
    poll_interval: Duration,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RunStore>,
        executor: Arc<Executor>,
        poll_interval: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            executor,
            poll_interval,
            concurrency,
        }
    }

    /// Run until `shutdown` flips, then drain in-flight executions.
    pub async fn run<F: RunFeed>(
        &self,
        mut feed: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut scan = tokio::time::interval(self.poll_interval);
        scan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut feed_down = false;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                hint = feed.next(), if !feed_down => match hint {
                    Ok(run_id) => {
                        tracing::debug!(run_id = %run_id, "hint received");
                        self.dispatch(run_id, &semaphore);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "hint feed failed, relying on the scan");
                        feed_down = true;
                    }
                },
                _ = scan.tick() => {
                    match self.store.list_dispatchable(Utc::now(), SCAN_BATCH).await {
                        Ok(ids) => {
                            if !ids.is_empty() {
                                tracing::debug!(count = ids.len(), "scan found dispatchable runs");
                            }
                            for run_id in ids {
                                self.dispatch(run_id, &semaphore);
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "dispatch scan failed"),
                    }
                }
            }
        }

        tracing::info!("dispatch loop stopping, draining in-flight runs");
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        Ok(())
    }

    /// Hand a run to the executor if capacity allows.
    ///
    /// At capacity the hint is dropped; the run stays claimable and the next
    /// scan picks it up.
    fn dispatch(&self, run_id: Uuid, semaphore: &Arc<Semaphore>) {
        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            tracing::debug!(run_id = %run_id, "at capacity, leaving run for the next scan");
            return;
        };

        let executor = self.executor.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = executor.execute(run_id).await {
                tracing::warn!(run_id = %run_id, error = %e, "execution errored");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::runner::RunnerRegistry;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use tether_core::{RunStatus, RunStore};
    use tether_testing::{ChannelFeed, MemoryRunStore, MemorySink, StaticRunner};

    fn dispatcher(store: Arc<MemoryRunStore>, concurrency: usize) -> Arc<Dispatcher> {
        let executor = Arc::new(Executor::new(
            store.clone(),
            RunnerRegistry::new(Arc::new(StaticRunner::new(json!({"ok": true})))),
            Arc::new(MemorySink::new()),
            ExecutorConfig {
                worker_id: "dispatch-test".to_string(),
                lease_ttl: ChronoDuration::seconds(60),
                heartbeat_interval: Duration::from_millis(10),
                job_timeout: Duration::from_secs(5),
                max_attempts: 5,
            },
        ));
        Arc::new(Dispatcher::new(
            store,
            executor,
            Duration::from_millis(20),
            concurrency,
        ))
    }

    async fn wait_for_status(store: &MemoryRunStore, run_id: Uuid, status: RunStatus) {
        for _ in 0..200 {
            let run = store.get(run_id).await.unwrap().unwrap();
            if run.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run never reached {status}");
    }

    #[tokio::test]
    async fn test_hint_drives_execution() {
        let store = Arc::new(MemoryRunStore::new());
        let run = store.insert_run(json!({}), "h").await.unwrap();

        let (hints, feed) = ChannelFeed::pair();
        let (stop, stopped) = watch::channel(false);
        let dispatcher = dispatcher(store.clone(), 2);
        let loop_task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run(feed, stopped).await })
        };

        hints.send(run.id).unwrap();
        wait_for_status(&store, run.id, RunStatus::Succeeded).await;

        stop.send(true).unwrap();
        loop_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_scan_recovers_a_dropped_hint() {
        let store = Arc::new(MemoryRunStore::new());
        let run = store.insert_run(json!({}), "h").await.unwrap();

        // No hint is ever sent; only the scan can find the run.
        let (_hints, feed) = ChannelFeed::pair();
        let (stop, stopped) = watch::channel(false);
        let dispatcher = dispatcher(store.clone(), 2);
        let loop_task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run(feed, stopped).await })
        };

        wait_for_status(&store, run.id, RunStatus::Succeeded).await;

        stop.send(true).unwrap();
        loop_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_capacity_overflow_is_retried_by_the_scan() {
        let store = Arc::new(MemoryRunStore::new());
        let first = store.insert_run(json!({"n": 1}), "h1").await.unwrap();
        let second = store.insert_run(json!({"n": 2}), "h2").await.unwrap();

        let (hints, feed) = ChannelFeed::pair();
        let (stop, stopped) = watch::channel(false);
        let dispatcher = dispatcher(store.clone(), 1);
        let loop_task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run(feed, stopped).await })
        };

        // Both hints arrive at once; capacity is one.
        hints.send(first.id).unwrap();
        hints.send(second.id).unwrap();

        wait_for_status(&store, first.id, RunStatus::Succeeded).await;
        wait_for_status(&store, second.id, RunStatus::Succeeded).await;

        stop.send(true).unwrap();
        loop_task.await.unwrap().unwrap();
    }
}
