use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres};
use tracing::debug;

use crate::api::job::models::JobStatus;
use crate::db::models::{JobRow, NewJob};
use crate::db::StoreError;

const JOB_COLUMNS: &str = "id, seq, status, progress, input_path, original_name, format, \
    speed, volume, output_name, error, created_at, updated_at";

/// Row as it comes out of PostgreSQL, before the text columns are parsed
#[derive(Debug, FromRow)]
struct PgJobRow {
    id: String,
    seq: i64,
    status: String,
    progress: i32,
    input_path: String,
    original_name: String,
    format: String,
    speed: f64,
    volume: f64,
    output_name: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgJobRow> for JobRow {
    type Error = StoreError;

    fn try_from(row: PgJobRow) -> Result<Self, Self::Error> {
        Ok(JobRow {
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            format: row.format.parse().map_err(StoreError::Corrupt)?,
            progress: row.progress.clamp(0, 100) as u8,
            id: row.id,
            seq: row.seq,
            input_path: row.input_path,
            original_name: row.original_name,
            speed: row.speed,
            volume: row.volume,
            output_name: row.output_name,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for Job database operations
#[derive(Clone)]
pub struct JobRepository {
    pool: Pool<Postgres>,
}

impl JobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Insert a queued job and return the full job record
    pub async fn create(&self, job: &NewJob) -> Result<JobRow, StoreError> {
        debug!("Creating job: id={}, format={:?}", job.id, job.format);

        let row: PgJobRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO jobs (id, status, input_path, original_name, format, speed, volume)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&job.id)
        .bind(JobStatus::Queued.as_str())
        .bind(&job.input_path)
        .bind(&job.original_name)
        .bind(job.format.extension())
        .bind(job.params.speed)
        .bind(job.params.volume)
        .fetch_one(&self.pool)
        .await?;

        debug!("Job created with id={} seq={}", row.id, row.seq);
        row.try_into()
    }

    pub async fn get(&self, id: &str) -> Result<Option<JobRow>, StoreError> {
        let row: Option<PgJobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(JobRow::try_from).transpose()
    }

    /// 1-based rank among queued jobs, 0 if the job is not queued
    pub async fn queue_position(&self, job: &JobRow) -> Result<u32, StoreError> {
        if job.status != JobStatus::Queued {
            return Ok(0);
        }

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = 'queued' AND seq <= $1")
                .bind(job.seq)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u32)
    }

    /// Claim the oldest queued job and mark it processing.
    ///
    /// `FOR UPDATE SKIP LOCKED` lets several workers poll concurrently
    /// without claiming the same row.
    pub async fn acquire_next_job(&self) -> Result<Option<JobRow>, StoreError> {
        let row: Option<PgJobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE jobs
            SET status = 'processing', updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'queued'
                ORDER BY seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::try_from).transpose()
    }

    pub async fn update_progress(&self, id: &str, progress: u8) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET progress = $2, updated_at = NOW() WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(i32::from(progress.min(100)))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn complete(&self, id: &str, output_name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', progress = 100, output_name = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(output_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn fail(&self, id: &str, error: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Put jobs a previous process left half-done back in the queue
    pub async fn requeue_interrupted(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', progress = 0, updated_at = NOW() WHERE status = 'processing'",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete terminal jobs last touched before `cutoff` and return them
    pub async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobRow>, StoreError> {
        let rows: Vec<PgJobRow> = sqlx::query_as(&format!(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed') AND updated_at < $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        debug!("Deleted {} expired jobs", rows.len());
        rows.into_iter().map(JobRow::try_from).collect()
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
