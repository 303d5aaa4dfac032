//! NOTIFY/LISTEN hint channel.
//!
//! A notification reaches only sessions listening at that moment; anything
//! else is dropped. That is exactly the contract the queue seam promises, so
//! the dispatch scan remains responsible for liveness.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use uuid::Uuid;

use tether_core::{RunFeed, RunQueue};

/// Channel carrying run-id hints from admission to workers.
pub const RUN_CHANNEL: &str = "tether_runs";

/// Producer side: `NOTIFY` on the run channel.
#[derive(Clone)]
pub struct PgNotifyQueue {
    pool: PgPool,
}

impl PgNotifyQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunQueue for PgNotifyQueue {
    async fn enqueue(&self, run_id: Uuid) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(RUN_CHANNEL)
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await
            .context("notify on run channel failed")?;

        Ok(())
    }
}

/// Consumer side: a `LISTEN` session yielding run-id hints.
pub struct PgRunFeed {
    listener: PgListener,
}

impl PgRunFeed {
    /// Open a dedicated listening connection to `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let mut listener = PgListener::connect(url)
            .await
            .context("connecting run-hint listener")?;
        listener
            .listen(RUN_CHANNEL)
            .await
            .context("subscribing to run channel")?;

        Ok(Self { listener })
    }
}

#[async_trait]
impl RunFeed for PgRunFeed {
    async fn next(&mut self) -> Result<Uuid> {
        loop {
            let notification = self.listener.recv().await?;
            match Uuid::parse_str(notification.payload()) {
                Ok(run_id) => return Ok(run_id),
                Err(_) => {
                    tracing::warn!(
                        payload = notification.payload(),
                        "discarding malformed run hint"
                    );
                }
            }
        }
    }
}
