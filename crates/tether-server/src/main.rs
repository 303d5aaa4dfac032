//! Tether admission server.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_core::{Config, Probe};
use tether_postgres::{PgNotifyQueue, PgProbe, PgRunStore, MIGRATOR};
use tether_server::{router, AdmissionService, AppState};

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

    tracing::info!("starting tether server");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("connecting to run store")?;
    MIGRATOR.run(&pool).await.context("running migrations")?;

    let queue_pool = if config.queue_url == config.database_url {
        pool.clone()
    } else {
        PgPoolOptions::new()
            .max_connections(2)
            .connect(&config.queue_url)
            .await
            .context("connecting to queue")?
    };

    let store = Arc::new(PgRunStore::new(pool.clone()));
    let queue = Arc::new(PgNotifyQueue::new(queue_pool.clone()));
    let probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(PgProbe::new("db", pool)),
        Arc::new(PgProbe::new("queue", queue_pool)),
    ];

    let state = AppState {
        admission: Arc::new(AdmissionService::new(store.clone(), queue)),
        store,
        probes: Arc::new(probes),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
