//! Job Lock Repository
//!
//! PostgreSQL-backed job locks. Mutual exclusion relies on the
//! `job_locks.job_name` primary key and `INSERT ... ON CONFLICT DO UPDATE
//! ... WHERE`, which Postgres evaluates atomically per row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::JobLock;

use super::{JobLockError, JobLockStore};

/// Job lock repository over a Postgres pool
#[derive(Debug, Clone)]
pub struct PgJobLockRepository {
    pool: PgPool,
}

impl PgJobLockRepository {
    /// Create a new PgJobLockRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn lease_secs(lease: Option<Duration>) -> Result<Option<i64>, JobLockError> {
    lease
        .map(|d| i64::try_from(d.as_secs()).map_err(|_| JobLockError::InvalidLease(d)))
        .transpose()
}

#[async_trait]
impl JobLockStore for PgJobLockRepository {
    async fn try_acquire(
        &self,
        job_name: &str,
        holder: Uuid,
        lease: Option<Duration>,
    ) -> Result<bool, JobLockError> {
        let lease_secs = lease_secs(lease)?;

        // First run inserts the row; later runs only flip it when unlocked
        // (or when the optional lease has expired).
        let acquired: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO job_locks (job_name, is_locked, locked_at, last_run_at, metadata)
            VALUES ($1, TRUE, NOW(), NOW(), jsonb_build_object('holder', $2::text))
            ON CONFLICT (job_name) DO UPDATE
            SET is_locked = TRUE,
                locked_at = NOW(),
                metadata = COALESCE(job_locks.metadata, '{}'::jsonb)
                    || jsonb_build_object('holder', $2::text)
            WHERE job_locks.is_locked = FALSE
               OR ($3::bigint IS NOT NULL
                   AND job_locks.locked_at <= NOW() - ($3::bigint * INTERVAL '1 second'))
            RETURNING job_name
            "#,
        )
        .bind(job_name)
        .bind(holder.to_string())
        .bind(lease_secs)
        .fetch_optional(&self.pool)
        .await?;

        if acquired.is_some() {
            tracing::debug!(job = %job_name, holder = %holder, "Job lock acquired");
        }

        Ok(acquired.is_some())
    }

    async fn release(
        &self,
        job_name: &str,
        holder: Uuid,
        summary: serde_json::Value,
    ) -> Result<bool, JobLockError> {
        let result = sqlx::query(
            r#"
            UPDATE job_locks
            SET is_locked = FALSE,
                locked_at = NULL,
                last_run_at = NOW(),
                metadata = $3
            WHERE job_name = $1
              AND is_locked = TRUE
              AND metadata->>'holder' = $2
            "#,
        )
        .bind(job_name)
        .bind(holder.to_string())
        .bind(&summary)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn force_release(&self, job_name: &str) -> Result<bool, JobLockError> {
        let result = sqlx::query(
            r#"
            UPDATE job_locks
            SET is_locked = FALSE,
                locked_at = NULL,
                metadata = (COALESCE(metadata, '{}'::jsonb) - 'holder')
                    || jsonb_build_object('released_manually_at', NOW())
            WHERE job_name = $1 AND is_locked = TRUE
            "#,
        )
        .bind(job_name)
        .execute(&self.pool)
        .await?;

        let released = result.rows_affected() == 1;
        if released {
            tracing::warn!(job = %job_name, "Job lock released manually");
        }

        Ok(released)
    }

    async fn get(&self, job_name: &str) -> Result<Option<JobLock>, JobLockError> {
        let row: Option<(
            String,
            bool,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
            Option<serde_json::Value>,
        )> = sqlx::query_as(
            r#"
            SELECT job_name, is_locked, last_run_at, locked_at, metadata
            FROM job_locks
            WHERE job_name = $1
            "#,
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(job_name, is_locked, last_run_at, locked_at, metadata)| -> Result<JobLock, JobLockError> {
                let lock = JobLock {
                    job_name,
                    is_locked,
                    last_run_at,
                    locked_at,
                    metadata,
                };
                lock.validate()?;
                Ok(lock)
            },
        )
        .transpose()
    }
}
