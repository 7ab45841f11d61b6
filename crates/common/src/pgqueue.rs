//! Durable Postgres-backed job queue.
//!
//! Jobs live in the `relay_jobs` table, in the same database as the post
//! store, so the ingress can rely on idempotent retry of its own action
//! (post row created iff job enqueued) instead of a dual-write across
//! brokers.
//!
//! Guarantees:
//! - at-least-once delivery to a consumer (claim via `FOR UPDATE SKIP
//!   LOCKED`, so parallel workers never double-claim a live job)
//! - per-job retry with exponential backoff and a configurable attempt
//!   limit; exhausted jobs land in a terminal `failed` state
//! - singleton keys: at most one job per `(queue, singleton_key)` may
//!   exist in `created|active|retry` at any instant, enforced by a partial
//!   unique index; a duplicate enqueue reports `AlreadyQueued` instead of
//!   erroring
//! - terminal jobs are archived (deleted) after a configurable age

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::retry::calculate_backoff;

/// Queue the ingress enqueues to and the worker consumes from.
pub const PROCESS_POST_QUEUE: &str = "process-post";

/// Name of the partial unique index guarding live singleton keys.
const SINGLETON_INDEX: &str = "relay_jobs_live_singleton_idx";

const BASE_DELAY_SECS: u64 = 5;
const MAX_DELAY_SECS: u64 = 600;

/// Queue-side job state. Distinct from the post's own status: a job can
/// end `failed` (retries exhausted) while its post sits in `received`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "lowercase")]
pub enum JobState {
    Created,
    Active,
    Retry,
    Completed,
    Failed,
}

/// A claimed or inspected job row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueuedJob {
    pub id: i64,
    pub queue: String,
    pub singleton_key: Option<String>,
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Number of times this job has been handed to a consumer.
    pub attempt: i32,
    pub max_attempts: i32,
    pub scheduled_for: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueuedJob {
    /// Decode the JSONB payload into a typed job.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(Error::Json)
    }
}

/// Result of an enqueue attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job was created.
    Enqueued(i64),
    /// A live job with the same singleton key already exists.
    AlreadyQueued,
}

/// Handle to one named queue.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    queue: String,
    /// Stamped onto jobs this instance enqueues; `retry` reads the limit
    /// back from the job row, so the enqueuing side fixes it.
    max_attempts: i32,
}

impl PgQueue {
    pub fn new(pool: PgPool, queue: &str, max_attempts: i32) -> Self {
        Self {
            pool,
            queue: queue.to_string(),
            max_attempts,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Enqueue a job keyed by `singleton_key`.
    ///
    /// Relies on the partial unique index and catches the duplicate-key
    /// error, the same discipline `PostStore::get_or_create` uses: the
    /// race loser learns the job already exists, it never errors out.
    pub async fn enqueue<T: Serialize>(
        &self,
        payload: &T,
        singleton_key: &str,
    ) -> Result<EnqueueOutcome> {
        let payload = serde_json::to_value(payload)?;

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO relay_jobs (queue, singleton_key, payload, state, max_attempts, scheduled_for)
            VALUES ($1, $2, $3, 'created', $4, NOW())
            RETURNING id
            "#,
        )
        .bind(&self.queue)
        .bind(singleton_key)
        .bind(&payload)
        .bind(self.max_attempts)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(id) => {
                debug!(queue = %self.queue, singleton_key, job_id = id, "Job enqueued");
                Ok(EnqueueOutcome::Enqueued(id))
            }
            Err(e) if Error::is_unique_violation(&e, SINGLETON_INDEX) => {
                debug!(queue = %self.queue, singleton_key, "Job already queued, skipping");
                Ok(EnqueueOutcome::AlreadyQueued)
            }
            Err(e) => Err(Error::Database(e)),
        }
    }

    /// Claim up to `batch_size` due jobs.
    ///
    /// Claimed jobs move to `active` with `attempt` incremented. `SKIP
    /// LOCKED` keeps parallel worker processes from blocking on (or
    /// double-claiming) each other's rows.
    pub async fn dequeue(&self, batch_size: i64) -> Result<Vec<QueuedJob>> {
        let jobs = sqlx::query_as::<_, QueuedJob>(
            r#"
            UPDATE relay_jobs
            SET state = 'active', attempt = attempt + 1
            WHERE id IN (
                SELECT id FROM relay_jobs
                WHERE queue = $1
                  AND state IN ('created', 'retry')
                  AND scheduled_for <= NOW()
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(&self.queue)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        if !jobs.is_empty() {
            debug!(queue = %self.queue, count = jobs.len(), "Claimed jobs");
        }

        Ok(jobs)
    }

    /// Mark a job successfully processed.
    pub async fn complete(&self, job: &QueuedJob) -> Result<()> {
        sqlx::query(
            "UPDATE relay_jobs SET state = 'completed', finished_at = NOW() WHERE id = $1",
        )
        .bind(job.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reschedule a failed job with backoff, or fail it terminally once
    /// its attempts are exhausted. Returns the state the job ended in.
    pub async fn retry(&self, job: &QueuedJob, error: &str) -> Result<JobState> {
        if job.attempt >= job.max_attempts {
            warn!(
                job_id = job.id,
                attempt = job.attempt,
                error,
                "Job exhausted retries, moving to failed"
            );
            self.fail(job, error).await?;
            return Ok(JobState::Failed);
        }

        let backoff = calculate_backoff(
            (job.attempt - 1).max(0) as u32,
            BASE_DELAY_SECS,
            MAX_DELAY_SECS,
        );
        let scheduled_for = Utc::now()
            + ChronoDuration::from_std(backoff).unwrap_or_else(|_| ChronoDuration::seconds(60));

        sqlx::query(
            r#"
            UPDATE relay_jobs
            SET state = 'retry', scheduled_for = $2, last_error = $3
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(scheduled_for)
        .bind(error)
        .execute(&self.pool)
        .await?;

        info!(
            job_id = job.id,
            attempt = job.attempt,
            max_attempts = job.max_attempts,
            backoff_secs = backoff.as_secs(),
            "Job rescheduled with backoff"
        );

        Ok(JobState::Retry)
    }

    /// Move a job to the terminal failed state.
    pub async fn fail(&self, job: &QueuedJob, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE relay_jobs
            SET state = 'failed', finished_at = NOW(), last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete terminal jobs older than the given age. Returns the number
    /// of rows removed.
    pub async fn archive(&self, older_than_days: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM relay_jobs
            WHERE queue = $1
              AND state IN ('completed', 'failed')
              AND COALESCE(finished_at, created_at) < NOW() - make_interval(days => $2)
            "#,
        )
        .bind(&self.queue)
        .bind(older_than_days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Number of live (not yet terminal) jobs in this queue.
    pub async fn depth(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM relay_jobs
            WHERE queue = $1 AND state IN ('created', 'active', 'retry')
            "#,
        )
        .bind(&self.queue)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
