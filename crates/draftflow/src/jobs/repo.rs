// crates/draftflow/src/jobs/repo.rs

use crate::jobs::model::{Job, JobResult, JobStep, NewJob};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Creation
    // ----------------------------

    pub async fn insert(&self, job: NewJob) -> anyhow::Result<Job> {
        let inserted = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (
                mode, status, current_step, completed_steps, total_steps,
                collection_handle, target_word_count, triggered_by,
                idempotency_key, request_id
            )
            VALUES ($1, 'pending', 'init', 0, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(job.mode.as_str())
        .bind(JobStep::TOTAL_STEPS)
        .bind(&job.collection_handle)
        .bind(job.target_word_count)
        .bind(&job.triggered_by)
        .bind(&job.idempotency_key)
        .bind(&job.request_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn get_status(&self, job_id: Uuid) -> anyhow::Result<Option<String>> {
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }

    // ----------------------------
    // Admission counters (Job Factory gates)
    // ----------------------------

    /// Jobs created inside the trailing window, scoped to one trigger or
    /// counted globally when no trigger is recorded on the request.
    pub async fn count_created_since(
        &self,
        triggered_by: Option<&str>,
        since: DateTime<Utc>,
    ) -> anyhow::Result<i64> {
        let count: i64 = match triggered_by {
            Some(t) => {
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*)
                    FROM jobs
                    WHERE triggered_by = $1
                      AND created_at >= $2
                    "#,
                )
                .bind(t)
                .bind(since)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*)
                    FROM jobs
                    WHERE created_at >= $1
                    "#,
                )
                .bind(since)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(count)
    }

    pub async fn count_running(&self) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'running'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ----------------------------
    // Leasing
    // ----------------------------

    /// Acquire the execution lease for one job.
    ///
    /// Single conditional UPDATE: the row must be `pending` (no live lease),
    /// or `running` with an expired lease, which is the crashed-worker
    /// recovery path. Returns `true` iff this caller won the row.
    ///
    /// Workers are independent processes, so this row is the only mutex;
    /// an in-process lock would not survive a worker restart.
    pub async fn acquire_lock(&self, job_id: Uuid, lease_seconds: i64) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running',
                started_at = COALESCE(started_at, now()),
                locked_until = now() + ($2::bigint * interval '1 second'),
                updated_at = now()
            WHERE id = $1
              AND (
                    (status = 'pending' AND (locked_until IS NULL OR locked_until < now()))
                 OR (status = 'running' AND locked_until IS NOT NULL AND locked_until < now())
              )
            "#,
        )
        .bind(job_id)
        .bind(lease_seconds)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Return expired `running` leases to `pending` so pollers can pick the
    /// work back up. Complements direct re-acquisition by `acquire_lock`.
    pub async fn reap_expired_leases(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                locked_until = NULL,
                updated_at = now()
            WHERE status = 'running'
              AND locked_until IS NOT NULL
              AND locked_until < now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Oldest claimable pending job, if any. The worker loop feeds this into
    /// `acquire_lock`; losing the race there is routine, not an error.
    pub async fn next_pending(&self) -> anyhow::Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM jobs
            WHERE status = 'pending'
              AND (locked_until IS NULL OR locked_until < now())
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    // ----------------------------
    // Progress cursor
    // ----------------------------

    /// Only a lease holder mutates the cursor, so the guard on `running`
    /// keeps a late writer from resurrecting a finished or cancelled row.
    pub async fn set_step(&self, job_id: Uuid, step: JobStep) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET current_step = $2,
                completed_steps = $3,
                updated_at = now()
            WHERE id = $1
              AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(step.as_str())
        .bind(step.position())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_author(&self, job_id: Uuid, author_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET author_id = $2,
                updated_at = now()
            WHERE id = $1
              AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(author_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ----------------------------
    // Terminal transitions
    // ----------------------------

    pub async fn mark_completed(&self, job_id: Uuid, result: &JobResult) -> anyhow::Result<()> {
        let payload = serde_json::to_value(result)?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $2,
                completed_at = now(),
                locked_until = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_failed(&self, job_id: Uuid, error_message: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error_message = $2,
                completed_at = now(),
                locked_until = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Cooperative cancellation: flips `pending` or `running` straight to
    /// `cancelled`. The executor notices at its next checkpoint. Returns
    /// `false` when the job was already terminal.
    pub async fn request_cancel(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                completed_at = now(),
                locked_until = NULL,
                updated_at = now()
            WHERE id = $1
              AND status IN ('pending', 'running')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
