//! Periodic lease renewal beside an executing run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use tether_core::RunStore;

/// Handle to the renewal task paired with one execution.
///
/// On a failed renewal the task records lease loss and exits; the executor
/// checks [`Heartbeat::lease_lost`] before handing out results. Renewal
/// *errors* (store unreachable) are not loss: the task keeps ticking and the
/// lease either recovers on a later tick or expires on its own.
pub struct Heartbeat {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
    lease_lost: watch::Receiver<bool>,
}

impl Heartbeat {
    pub fn spawn(
        store: Arc<dyn RunStore>,
        run_id: Uuid,
        worker_id: String,
        interval: Duration,
        ttl: ChronoDuration,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let (lost, lease_lost) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The interval fires immediately; the lease was just granted.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        match store.try_renew_lease(run_id, &worker_id, Utc::now(), ttl).await {
                            Ok(true) => {
                                tracing::debug!(run_id = %run_id, "lease renewed");
                            }
                            Ok(false) => {
                                tracing::warn!(
                                    run_id = %run_id,
                                    worker_id = %worker_id,
                                    "lease lost"
                                );
                                let _ = lost.send(true);
                                break;
                            }
                            Err(e) => {
                                tracing::warn!(
                                    run_id = %run_id,
                                    error = %e,
                                    "lease renewal errored, will retry"
                                );
                            }
                        }
                    }
                }
            }
        });

        Self {
            handle,
            stop,
            lease_lost,
        }
    }

    /// Whether a renewal came back denied.
    pub fn lease_lost(&self) -> bool {
        *self.lease_lost.borrow()
    }

    /// Stop renewing and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use tether_testing::MemoryRunStore;

    fn ttl() -> ChronoDuration {
        ChronoDuration::seconds(60)
    }

    #[tokio::test]
    async fn test_heartbeat_extends_the_lease() {
        let store = Arc::new(MemoryRunStore::new());
        let run = store.insert_run(json!({}), "h").await.unwrap();
        let t0 = Utc::now();
        assert!(store.try_acquire_lease(run.id, "w1", t0, ttl()).await.unwrap());
        let initial_expiry = store.get(run.id).await.unwrap().unwrap().lease_expires_at;

        let heartbeat = Heartbeat::spawn(
            store.clone(),
            run.id,
            "w1".to_string(),
            Duration::from_millis(10),
            ttl(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let renewed_expiry = store.get(run.id).await.unwrap().unwrap().lease_expires_at;
        assert!(renewed_expiry > initial_expiry);
        assert!(!heartbeat.lease_lost());

        heartbeat.stop().await;
    }

    #[tokio::test]
    async fn test_stolen_lease_is_reported_lost() {
        let store = Arc::new(MemoryRunStore::new());
        let run = store.insert_run(json!({}), "h").await.unwrap();
        let t0 = Utc::now();
        assert!(store.try_acquire_lease(run.id, "w1", t0, ttl()).await.unwrap());

        let heartbeat = Heartbeat::spawn(
            store.clone(),
            run.id,
            "w1".to_string(),
            Duration::from_millis(10),
            ttl(),
        );

        // Another worker reclaims the run after expiry.
        assert!(store
            .try_acquire_lease(run.id, "w2", t0 + ChronoDuration::seconds(61), ttl())
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(heartbeat.lease_lost());

        heartbeat.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_prompt_even_with_a_long_interval() {
        let store = Arc::new(MemoryRunStore::new());
        let run = store.insert_run(json!({}), "h").await.unwrap();
        assert!(store
            .try_acquire_lease(run.id, "w1", Utc::now(), ttl())
            .await
            .unwrap());

        let heartbeat = Heartbeat::spawn(
            store.clone(),
            run.id,
            "w1".to_string(),
            Duration::from_secs(3600),
            ttl(),
        );

        tokio::time::timeout(Duration::from_secs(1), heartbeat.stop())
            .await
            .expect("stop should not wait for the next tick");
    }
}
