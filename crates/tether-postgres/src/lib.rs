//! PostgreSQL implementation of the tether run store and hint queue.
//!
//! This crate provides the production implementations of the `RunStore`,
//! `RunQueue`, and `RunFeed` traits from `tether-core`.
//!
//! # Features
//!
//! - Lease acquisition as a row-level conditional `UPDATE ... RETURNING`
//! - Worker heartbeats (lease renewal) for long-running model executions
//! - Single-transaction admission with idempotency-key collision recovery
//! - `NOTIFY`/`LISTEN` hint channel; dropped notifications are recovered by
//!   the dispatch scan over pending rows and stale leases
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE runs (
//!     id UUID PRIMARY KEY,
//!
//!     -- Lifecycle
//!     status TEXT NOT NULL DEFAULT 'PENDING',
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     started_at TIMESTAMPTZ,
//!     finished_at TIMESTAMPTZ,
//!
//!     -- Immutable inputs
//!     parameters JSONB NOT NULL,
//!     payload_hash TEXT NOT NULL,
//!
//!     -- Execution and leasing
//!     attempt_count INTEGER NOT NULL DEFAULT 0,
//!     lease_owner TEXT,
//!     lease_expires_at TIMESTAMPTZ,
//!
//!     -- Outputs
//!     result_ref TEXT,
//!     last_error TEXT
//! );
//!
//! CREATE INDEX idx_runs_payload_hash ON runs (payload_hash);
//! CREATE INDEX idx_runs_status_lease ON runs (status, lease_expires_at);
//!
//! CREATE TABLE idempotency_keys (
//!     key TEXT PRIMARY KEY,
//!     run_id UUID NOT NULL REFERENCES runs (id),
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether_postgres::{PgNotifyQueue, PgRunStore, MIGRATOR};
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/tether").await?;
//! MIGRATOR.run(&pool).await?;
//!
//! let store = PgRunStore::new(pool.clone());
//! let queue = PgNotifyQueue::new(pool);
//! ```

mod queue;
mod store;

pub use queue::{PgNotifyQueue, PgRunFeed, RUN_CHANNEL};
pub use store::{PgProbe, PgRunStore};

/// Embedded schema migrations; run at startup by both binaries.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
