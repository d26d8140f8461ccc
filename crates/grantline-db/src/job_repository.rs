use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use grantline_core::error::AppError;
use grantline_core::job::{
    JobResult, JobStatus, NewScrapeJob, RetentionPolicy, RetentionRule, STALLED_JOB_ERROR, ScrapeJob,
};
use grantline_core::job_queue::JobQueue;
use grantline_core::models::SourceType;

/// PostgreSQL-backed job queue using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct ScrapeJobRepository {
    pool: Pool<Postgres>,
}

impl ScrapeJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn prune_status(&self, status: JobStatus, rule: &RetentionRule) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM scrape_jobs
            WHERE id IN (
                SELECT id FROM (
                    SELECT
                        id,
                        COALESCE(completed_at, updated_at) AS finished_at,
                        ROW_NUMBER() OVER (ORDER BY COALESCE(completed_at, updated_at) DESC) AS rank
                    FROM scrape_jobs
                    WHERE status = $1
                ) ranked
                WHERE rank > $2 OR finished_at < NOW() - make_interval(secs => $3)
            )
            "#,
        )
        .bind(status.as_str())
        .bind(rule.max_count as i64)
        .bind(rule.max_age.num_seconds() as f64)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ScrapeJobRow {
    id: String,
    source_id: Uuid,
    source_name: String,
    source_url: String,
    source_type: String,
    status: String,
    attempts: i32,
    max_attempts: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    next_run_at: DateTime<Utc>,
    error_message: Option<String>,
    result: Option<serde_json::Value>,
    worker_id: Option<String>,
}

impl From<ScrapeJobRow> for ScrapeJob {
    fn from(row: ScrapeJobRow) -> Self {
        ScrapeJob {
            id: row.id,
            source_id: row.source_id,
            source_name: row.source_name,
            source_url: row.source_url,
            source_type: row.source_type.parse().unwrap_or(SourceType::Html),
            status: row.status.parse().unwrap_or(JobStatus::Queued),
            attempts: row.attempts as u32,
            max_attempts: row.max_attempts as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            next_run_at: row.next_run_at,
            error_message: row.error_message,
            result: row.result.and_then(|v| serde_json::from_value(v).ok()),
            worker_id: row.worker_id,
        }
    }
}

fn result_json(result: Option<&JobResult>) -> Result<Option<serde_json::Value>, AppError> {
    result.map(serde_json::to_value).transpose().map_err(Into::into)
}

impl JobQueue for ScrapeJobRepository {
    async fn add(&self, request: NewScrapeJob) -> Result<ScrapeJob, AppError> {
        let job = ScrapeJob::queued(&request, Utc::now());
        let row = sqlx::query_as::<_, ScrapeJobRow>(
            r#"
            INSERT INTO scrape_jobs
                (id, source_id, source_name, source_url, source_type, max_attempts,
                 created_at, updated_at, next_run_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $7)
            RETURNING *
            "#,
        )
        .bind(&job.id)
        .bind(job.source_id)
        .bind(&job.source_name)
        .bind(&job.source_url)
        .bind(job.source_type.as_str())
        .bind(job.max_attempts as i32)
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn add_bulk(&self, requests: Vec<NewScrapeJob>) -> Result<Vec<ScrapeJob>, AppError> {
        let now = Utc::now();
        let jobs: Vec<ScrapeJob> = requests.iter().map(|r| ScrapeJob::queued(r, now)).collect();
        if jobs.is_empty() {
            return Ok(jobs);
        }

        let mut ids = Vec::with_capacity(jobs.len());
        let mut source_ids = Vec::with_capacity(jobs.len());
        let mut names = Vec::with_capacity(jobs.len());
        let mut urls = Vec::with_capacity(jobs.len());
        let mut types = Vec::with_capacity(jobs.len());
        let mut max_attempts = Vec::with_capacity(jobs.len());
        for job in &jobs {
            ids.push(job.id.clone());
            source_ids.push(job.source_id);
            names.push(job.source_name.clone());
            urls.push(job.source_url.clone());
            types.push(job.source_type.as_str().to_string());
            max_attempts.push(job.max_attempts as i32);
        }

        let rows = sqlx::query_as::<_, ScrapeJobRow>(
            r#"
            INSERT INTO scrape_jobs
                (id, source_id, source_name, source_url, source_type, max_attempts,
                 created_at, updated_at, next_run_at)
            SELECT id, source_id, source_name, source_url, source_type, max_attempts, $7, $7, $7
            FROM UNNEST($1::varchar[], $2::uuid[], $3::varchar[], $4::varchar[], $5::varchar[], $6::int4[])
                AS t(id, source_id, source_name, source_url, source_type, max_attempts)
            RETURNING *
            "#,
        )
        .bind(&ids)
        .bind(&source_ids)
        .bind(&names)
        .bind(&urls)
        .bind(&types)
        .bind(&max_attempts)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<ScrapeJob>, AppError> {
        let row = sqlx::query_as::<_, ScrapeJobRow>(
            r#"
            UPDATE scrape_jobs
            SET status = 'running', worker_id = $1, attempts = attempts + 1,
                started_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM scrape_jobs
                WHERE status = 'queued' AND next_run_at <= NOW()
                ORDER BY next_run_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn complete(&self, job_id: &str, result: &JobResult) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = 'completed', completed_at = NOW(), updated_at = NOW(),
                result = $2, error_message = NULL, worker_id = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(serde_json::to_value(result)?)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn fail(
        &self,
        job_id: &str,
        error: &str,
        result: Option<&JobResult>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        // With next_run_at the job goes back to the queue; otherwise it is terminal.
        sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET
                status = CASE WHEN $4::timestamptz IS NOT NULL THEN 'queued' ELSE 'failed' END,
                next_run_at = COALESCE($4, next_run_at),
                completed_at = CASE WHEN $4::timestamptz IS NOT NULL THEN NULL ELSE NOW() END,
                started_at = CASE WHEN $4::timestamptz IS NOT NULL THEN NULL ELSE started_at END,
                error_message = $2,
                result = $3,
                updated_at = NOW(),
                worker_id = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(result_json(result)?)
        .bind(next_run_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<ScrapeJob>, AppError> {
        let row = sqlx::query_as::<_, ScrapeJobRow>(r#"SELECT * FROM scrape_jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<ScrapeJob>, AppError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, ScrapeJobRow>(
                r#"
                SELECT * FROM scrape_jobs
                WHERE status = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, ScrapeJobRow>(
                r#"
                SELECT * FROM scrape_jobs
                ORDER BY created_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = 'queued', worker_id = NULL, started_at = NULL, updated_at = NOW()
            WHERE worker_id = $1 AND status = 'running'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn recover_stalled(&self, lease: Duration) -> Result<u64, AppError> {
        // `attempts` already counts the stalled claim.
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET
                status = CASE WHEN attempts < max_attempts THEN 'queued' ELSE 'failed' END,
                next_run_at = CASE WHEN attempts < max_attempts THEN NOW() ELSE next_run_at END,
                completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE NOW() END,
                started_at = CASE WHEN attempts < max_attempts THEN NULL ELSE started_at END,
                error_message = $2,
                worker_id = NULL,
                updated_at = NOW()
            WHERE status = 'running' AND started_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(lease.as_secs_f64())
        .bind(STALLED_JOB_ERROR)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM scrape_jobs WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    async fn prune(&self, policy: &RetentionPolicy) -> Result<u64, AppError> {
        let mut removed = 0;
        for status in [JobStatus::Completed, JobStatus::Failed] {
            if let Some(rule) = policy.rule_for(status) {
                removed += self.prune_status(status, rule).await?;
            }
        }
        Ok(removed)
    }
}
