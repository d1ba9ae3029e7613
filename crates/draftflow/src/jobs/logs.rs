use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::jobs::model::{JobStep, LogLevel, LogPayload};

/// A row from the append-only `job_logs` table. `seq` is assigned by the
/// store and defines the one true ordering for every reader.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct JobLogRow {
    pub seq: i64,
    pub job_id: Uuid,
    pub at: DateTime<Utc>,
    pub step: String,
    pub level: String,
    pub message: String,
    pub payload: Option<Value>,
}

#[derive(Clone)]
pub struct JobLogsRepo {
    pool: PgPool,
}

impl JobLogsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one entry. A single INSERT is atomic under concurrent appends;
    /// nothing here ever rewrites or deletes existing rows.
    pub async fn append(
        &self,
        job_id: Uuid,
        level: LogLevel,
        step: JobStep,
        message: &str,
        payload: Option<LogPayload>,
    ) -> anyhow::Result<()> {
        let payload = payload.map(serde_json::to_value).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO job_logs (job_id, step, level, message, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job_id)
        .bind(step.as_str())
        .bind(level.as_str())
        .bind(message)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_for_job(&self, job_id: Uuid) -> anyhow::Result<Vec<JobLogRow>> {
        let rows = sqlx::query_as::<_, JobLogRow>(
            r#"
            SELECT seq, job_id, at, step, level, message, payload
            FROM job_logs
            WHERE job_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Entries appended after `after_seq`, in append order. The stream
    /// server uses this as its "not yet sent" cursor.
    pub async fn list_after(&self, job_id: Uuid, after_seq: i64) -> anyhow::Result<Vec<JobLogRow>> {
        let rows = sqlx::query_as::<_, JobLogRow>(
            r#"
            SELECT seq, job_id, at, step, level, message, payload
            FROM job_logs
            WHERE job_id = $1
              AND seq > $2
            ORDER BY seq ASC
            "#,
        )
        .bind(job_id)
        .bind(after_seq)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
