//! The Postgres run store: conditional updates are the concurrency control.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use tether_core::{Admission, Probe, Run, RunStatus, RunStore, StatusCounts, StoreError};

/// Every read returns the full row; keep the column list in one place.
const RUN_COLUMNS: &str = "id, status, parameters, payload_hash, created_at, started_at, \
     finished_at, attempt_count, lease_owner, lease_expires_at, result_ref, last_error";

/// PostgreSQL run store.
#[derive(Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.into())
}

fn run_from_row(row: &PgRow) -> Result<Run, StoreError> {
    let status: String = row.get("status");
    let status: RunStatus = status
        .parse()
        .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;

    Ok(Run {
        id: row.get("id"),
        status,
        parameters: row.get("parameters"),
        payload_hash: row.get("payload_hash"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        attempt_count: row.get("attempt_count"),
        lease_owner: row.get("lease_owner"),
        lease_expires_at: row.get("lease_expires_at"),
        result_ref: row.get("result_ref"),
        last_error: row.get("last_error"),
    })
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn insert_run(&self, parameters: Value, payload_hash: &str) -> Result<Run, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO runs (id, parameters, payload_hash) \
             VALUES ($1, $2, $3) \
             RETURNING {RUN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&parameters)
        .bind(payload_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        run_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(run_from_row).transpose()
    }

    async fn find_active_by_hash(&self, payload_hash: &str) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs \
             WHERE payload_hash = $1 AND status IN ('PENDING', 'RUNNING') \
             ORDER BY created_at ASC \
             LIMIT 1"
        ))
        .bind(payload_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(run_from_row).transpose()
    }

    async fn bind_idempotency_key(&self, key: &str, run_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO idempotency_keys (key, run_id) VALUES ($1, $2)")
            .bind(key)
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::KeyAlreadyBound {
                        key: key.to_string(),
                    }
                }
                _ => db_err(e),
            })?;

        Ok(())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Uuid>, StoreError> {
        let row = sqlx::query("SELECT run_id FROM idempotency_keys WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(|r| r.get("run_id")))
    }

    async fn admit_run(
        &self,
        parameters: Value,
        payload_hash: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Admission, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(&format!(
            "INSERT INTO runs (id, parameters, payload_hash) \
             VALUES ($1, $2, $3) \
             RETURNING {RUN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&parameters)
        .bind(payload_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let run = run_from_row(&row)?;

        if let Some(key) = idempotency_key {
            // ON CONFLICT DO NOTHING waits out a concurrent uncommitted
            // binding, so a zero row count means the winner has committed.
            let bound = sqlx::query(
                "INSERT INTO idempotency_keys (key, run_id) VALUES ($1, $2) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(run.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

            if bound == 0 {
                tx.rollback().await.map_err(db_err)?;

                let winner_id = self.find_by_idempotency_key(key).await?.ok_or_else(|| {
                    StoreError::Backend(anyhow::anyhow!(
                        "idempotency key {key:?} conflicted but has no binding"
                    ))
                })?;
                let winner = self.get(winner_id).await?.ok_or_else(|| {
                    StoreError::Backend(anyhow::anyhow!(
                        "idempotency key {key:?} is bound to missing run {winner_id}"
                    ))
                })?;

                tracing::info!(
                    key,
                    run_id = %winner.id,
                    "admission lost idempotency-key race, returning winner"
                );
                return Ok(Admission {
                    run: winner,
                    newly_created: false,
                });
            }
        }

        tx.commit().await.map_err(db_err)?;
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
        let row = sqlx::query(
            "UPDATE runs \
             SET status = 'RUNNING', \
                 lease_owner = $2, \
                 lease_expires_at = $3, \
                 started_at = COALESCE(started_at, $4), \
                 attempt_count = attempt_count + 1 \
             WHERE id = $1 \
               AND (status = 'PENDING' \
                    OR (status = 'RUNNING' AND lease_expires_at < $4)) \
             RETURNING id",
        )
        .bind(id)
        .bind(worker_id)
        .bind(now + ttl)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.is_some())
    }

    async fn try_renew_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "UPDATE runs \
             SET lease_expires_at = $3 \
             WHERE id = $1 AND lease_owner = $2 AND status = 'RUNNING' \
             RETURNING id",
        )
        .bind(id)
        .bind(worker_id)
        .bind(now + ttl)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.is_some())
    }

    async fn finalize_success(
        &self,
        id: Uuid,
        worker_id: &str,
        result_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "UPDATE runs \
             SET status = 'SUCCEEDED', result_ref = $3, finished_at = $4 \
             WHERE id = $1 AND lease_owner = $2 AND status = 'RUNNING' \
             RETURNING id",
        )
        .bind(id)
        .bind(worker_id)
        .bind(result_ref)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.is_some())
    }

    async fn finalize_failure(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "UPDATE runs \
             SET status = 'FAILED', last_error = $3, finished_at = $4 \
             WHERE id = $1 AND lease_owner = $2 AND status = 'RUNNING' \
             RETURNING id",
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.is_some())
    }

    async fn force_failure(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE runs \
             SET status = 'FAILED', last_error = $2, finished_at = $3 \
             WHERE id = $1 \
               AND status NOT IN ('SUCCEEDED', 'FAILED', 'CANCELLED')",
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn mark_exhausted(
        &self,
        id: Uuid,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "UPDATE runs \
             SET status = 'FAILED', last_error = 'attempts exhausted', finished_at = $3 \
             WHERE id = $1 \
               AND attempt_count >= $2 \
               AND (status = 'PENDING' \
                    OR (status = 'RUNNING' AND lease_expires_at < $3)) \
             RETURNING id",
        )
        .bind(id)
        .bind(max_attempts)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.is_some())
    }

    async fn list_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM runs \
             WHERE status = 'PENDING' \
                OR (status = 'RUNNING' AND lease_expires_at < $1) \
             ORDER BY created_at ASC \
             LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    async fn counts(&self) -> Result<StatusCounts, StoreError> {
        let row = sqlx::query(
            "SELECT \
                COUNT(*) FILTER (WHERE status = 'PENDING') AS pending, \
                COUNT(*) FILTER (WHERE status = 'RUNNING') AS running, \
                COUNT(*) FILTER (WHERE status = 'SUCCEEDED') AS succeeded, \
                COUNT(*) FILTER (WHERE status = 'FAILED') AS failed, \
                COUNT(*) FILTER (WHERE status = 'CANCELLED') AS cancelled \
             FROM runs",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(StatusCounts {
            pending: row.get("pending"),
            running: row.get("running"),
            succeeded: row.get("succeeded"),
            failed: row.get("failed"),
            cancelled: row.get("cancelled"),
        })
    }
}

/// Reachability probe for a Postgres dependency.
pub struct PgProbe {
    name: &'static str,
    pool: PgPool,
}

impl PgProbe {
    pub fn new(name: &'static str, pool: PgPool) -> Self {
        Self { name, pool }
    }
}

#[async_trait]
impl Probe for PgProbe {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
