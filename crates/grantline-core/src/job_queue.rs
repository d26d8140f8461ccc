use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::job::{JobResult, JobStatus, NewScrapeJob, RetentionPolicy, ScrapeJob};

/// Persistent job queue for scrape jobs.
///
/// Implementations must support atomic claiming via `SELECT FOR UPDATE SKIP LOCKED`
/// or equivalent to prevent multiple workers from claiming the same job.
pub trait JobQueue: Send + Sync + Clone {
    fn add(&self, request: NewScrapeJob) -> impl Future<Output = Result<ScrapeJob, AppError>> + Send;

    /// Enqueues every request in one call.
    fn add_bulk(
        &self,
        requests: Vec<NewScrapeJob>,
    ) -> impl Future<Output = Result<Vec<ScrapeJob>, AppError>> + Send;

    /// Atomically claim the next due job, incrementing its attempt counter.
    ///
    /// Returns `None` if no jobs are available.
    fn claim(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<ScrapeJob>, AppError>> + Send;

    fn complete(
        &self,
        job_id: &str,
        result: &JobResult,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Mark a job as failed. If `next_run_at` is provided, the job is
    /// re-queued for that time; otherwise it is marked as permanently `failed`.
    fn fail(
        &self,
        job_id: &str,
        error: &str,
        result: Option<&JobResult>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get(&self, job_id: &str) -> impl Future<Output = Result<Option<ScrapeJob>, AppError>> + Send;

    /// Newest first.
    fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScrapeJob>, AppError>> + Send;

    /// Release all jobs held by a specific worker (for graceful shutdown).
    fn release_worker_jobs(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Recover `running` jobs claimed longer than `lease` ago whose worker
    /// never reported back. Jobs with attempts left go back to the queue, the
    /// rest are marked `failed`. Returns the number of jobs recovered.
    fn recover_stalled(
        &self,
        lease: Duration,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn count_by_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Evicts terminal jobs beyond the retention bounds. Returns the number removed.
    fn prune(
        &self,
        policy: &RetentionPolicy,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}
