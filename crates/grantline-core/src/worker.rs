use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{JobResult, ScrapeJob, WorkerConfig};
use crate::job_queue::JobQueue;
use crate::traits::SourceRunner;

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    JobClaimed {
        job: &'a ScrapeJob,
    },
    JobStarted {
        job_id: &'a str,
        source_id: Uuid,
    },
    JobCompleted {
        job_id: &'a str,
        result: &'a JobResult,
    },
    JobFailed {
        job_id: &'a str,
        error: &'a str,
        will_retry: bool,
    },
    JobsPruned {
        count: u64,
    },
    JobsRecovered {
        count: u64,
    },
    ShuttingDown {
        worker_id: &'a str,
        jobs_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for jobs");
            }
            WorkerEvent::JobClaimed { job } => {
                tracing::info!(job_id = %job.id, source = %job.source_name, attempt = job.attempts, "Job claimed");
            }
            WorkerEvent::JobStarted { job_id, source_id } => {
                tracing::info!(%job_id, %source_id, "Processing job");
            }
            WorkerEvent::JobCompleted { job_id, result } => {
                tracing::info!(
                    %job_id,
                    grants_found = result.grants_found,
                    grants_saved = result.grants_saved,
                    duration_ms = result.duration_ms,
                    success = result.success,
                    "Job completed"
                );
            }
            WorkerEvent::JobFailed {
                job_id,
                error,
                will_retry,
            } => {
                tracing::warn!(%job_id, %error, %will_retry, "Job failed");
            }
            WorkerEvent::JobsPruned { count } => {
                tracing::debug!(%count, "Pruned finished jobs");
            }
            WorkerEvent::JobsRecovered { count } => {
                tracing::warn!(%count, "Recovered stalled jobs");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                jobs_released,
            } => {
                tracing::info!(%worker_id, %jobs_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Worker that polls the job queue and runs each job's source.
pub struct WorkerService<Q, R>
where
    Q: JobQueue,
    R: SourceRunner,
{
    queue: Q,
    runner: R,
    config: WorkerConfig,
}

impl<Q, R> WorkerService<Q, R>
where
    Q: JobQueue,
    R: SourceRunner,
{
    pub fn new(queue: Q, runner: R, config: WorkerConfig) -> Self {
        Self {
            queue,
            runner,
            config,
        }
    }

    /// Run the worker loop until cancellation.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            match self.run_once(reporter).await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim job");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        // Graceful shutdown: release all claimed jobs
        let released = self
            .queue
            .release_worker_jobs(&self.config.worker_id)
            .await
            .unwrap_or(0);

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            jobs_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    /// Claims and processes at most one job. Returns whether a job was found.
    pub async fn run_once<WR: WorkerReporter>(&self, reporter: &WR) -> Result<bool, AppError> {
        reporter.report(WorkerEvent::Polling);
        self.recover_stalled(reporter).await;

        match self.queue.claim(&self.config.worker_id).await? {
            Some(job) => {
                reporter.report(WorkerEvent::JobClaimed { job: &job });
                self.process_job(&job, reporter).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process_job<WR: WorkerReporter>(&self, job: &ScrapeJob, reporter: &WR) {
        reporter.report(WorkerEvent::JobStarted {
            job_id: &job.id,
            source_id: job.source_id,
        });

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.runner.run_source(job.source_id))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (error_msg, retryable) = match outcome {
            Ok(Ok(persisted)) => {
                let result = JobResult {
                    source_id: persisted.source_id,
                    source_name: persisted.source_name,
                    grants_found: persisted.grant_count,
                    grants_saved: persisted.saved,
                    duration_ms,
                    success: persisted.success,
                    error: persisted.error,
                };
                reporter.report(WorkerEvent::JobCompleted {
                    job_id: &job.id,
                    result: &result,
                });
                if let Err(e) = self.queue.complete(&job.id, &result).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                }
                self.prune(reporter).await;
                return;
            }
            Ok(Err(e)) => (e.to_string(), e.is_retryable()),
            Err(_) => ("Job panicked while running source".to_string(), false),
        };

        let will_retry = retryable && job.can_retry();
        reporter.report(WorkerEvent::JobFailed {
            job_id: &job.id,
            error: &error_msg,
            will_retry,
        });

        let final_error = if retryable && !will_retry {
            AppError::RetryExceeded {
                attempts: job.attempts,
                last_error: error_msg,
            }
            .to_string()
        } else {
            error_msg
        };
        let result = JobResult {
            source_id: job.source_id,
            source_name: job.source_name.clone(),
            grants_found: 0,
            grants_saved: 0,
            duration_ms,
            success: false,
            error: Some(final_error.clone()),
        };
        let next_run = will_retry.then(|| job.calculate_next_run(&self.config.retry_config));

        if let Err(e) = self
            .queue
            .fail(&job.id, &final_error, Some(&result), next_run)
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
        }
        if !will_retry {
            self.prune(reporter).await;
        }
    }

    /// Jobs left `running` by a worker that died are requeued or failed
    /// here; a graceful shutdown releases them itself.
    async fn recover_stalled<WR: WorkerReporter>(&self, reporter: &WR) {
        match self.queue.recover_stalled(self.config.stall_timeout).await {
            Ok(0) => {}
            Ok(count) => reporter.report(WorkerEvent::JobsRecovered { count }),
            Err(e) => tracing::error!(error = %e, "Failed to recover stalled jobs"),
        }
    }

    async fn prune<WR: WorkerReporter>(&self, reporter: &WR) {
        match self.queue.prune(&self.config.retention).await {
            Ok(0) => {}
            Ok(count) => reporter.report(WorkerEvent::JobsPruned { count }),
            Err(e) => tracing::error!(error = %e, "Failed to prune finished jobs"),
        }
    }
}
