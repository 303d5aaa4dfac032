//! Tether worker.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_core::{Config, RunStore};
use tether_postgres::{PgRunFeed, PgRunStore, MIGRATOR};
use tether_worker::{
    worker_identity, Dispatcher, Executor, ExecutorConfig, FsResultSink, MockRunner,
    RunnerRegistry,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let worker_id = worker_identity();
    tracing::info!(worker_id = %worker_id, "starting tether worker");

    let pool = PgPoolOptions::new()
        .max_connections(config.worker_concurrency as u32 + 2)
        .connect(&config.database_url)
        .await
        .context("connecting to run store")?;
    MIGRATOR.run(&pool).await.context("running migrations")?;

    let store: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool));

    let counts = store.counts().await?;
    tracing::info!(
        pending = counts.pending,
        running = counts.running,
        "run backlog at startup"
    );

    let registry = RunnerRegistry::new(Arc::new(MockRunner));

    let executor = Arc::new(Executor::new(
        store.clone(),
        registry,
        Arc::new(FsResultSink::new(&config.result_dir)),
        ExecutorConfig {
            worker_id,
            lease_ttl: config.lease_ttl(),
            heartbeat_interval: config.heartbeat_interval(),
            job_timeout: config.job_timeout(),
            max_attempts: config.max_attempts,
        },
    ));

    let feed = PgRunFeed::connect(&config.queue_url)
        .await
        .context("connecting run-hint feed")?;

    let (stop, stopped) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = stop.send(true);
        }
    });

    let dispatcher = Dispatcher::new(
        store,
        executor,
        config.poll_interval(),
        config.worker_concurrency,
    );
    dispatcher.run(feed, stopped).await?;

    tracing::info!("tether worker stopped");
    Ok(())
}
