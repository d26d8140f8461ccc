use std::future::Future;

use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{NewScrapeJob, ScrapeJob};
use crate::job_queue::JobQueue;
use crate::models::Source;
use crate::traits::SourceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnqueueSummary {
    pub queued: usize,
}

/// Something that can queue a job for every active source. Driven by the scheduler.
pub trait ActiveSourceEnqueuer: Send + Sync + Clone + 'static {
    fn enqueue_active_sources(
        &self,
    ) -> impl Future<Output = Result<EnqueueSummary, AppError>> + Send;
}

/// Turns sources into queued scrape jobs.
#[derive(Clone)]
pub struct EnqueueService<Q: JobQueue, R: SourceRegistry> {
    queue: Q,
    registry: R,
}

impl<Q: JobQueue, R: SourceRegistry> EnqueueService<Q, R> {
    pub fn new(queue: Q, registry: R) -> Self {
        Self { queue, registry }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub async fn enqueue_one(&self, source: &Source) -> Result<ScrapeJob, AppError> {
        let job = self.queue.add(NewScrapeJob::from_source(source)).await?;
        tracing::info!(job_id = %job.id, source_id = %source.id, "Job queued");
        Ok(job)
    }

    pub async fn enqueue_bulk(&self, sources: &[Source]) -> Result<Vec<ScrapeJob>, AppError> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let requests = sources.iter().map(NewScrapeJob::from_source).collect();
        let jobs = self.queue.add_bulk(requests).await?;
        tracing::info!(count = jobs.len(), "Jobs queued in bulk");
        Ok(jobs)
    }

    /// Fails with `SourceNotFound` for an unknown id.
    pub async fn enqueue_source_by_id(&self, source_id: Uuid) -> Result<ScrapeJob, AppError> {
        let source = self
            .registry
            .get_source(source_id)
            .await?
            .ok_or_else(|| AppError::SourceNotFound(source_id.to_string()))?;
        self.enqueue_one(&source).await
    }
}

impl<Q, R> ActiveSourceEnqueuer for EnqueueService<Q, R>
where
    Q: JobQueue + 'static,
    R: SourceRegistry + 'static,
{
    async fn enqueue_active_sources(&self) -> Result<EnqueueSummary, AppError> {
        let sources = self.registry.list_active_sources().await?;
        if sources.is_empty() {
            tracing::info!("No active sources to enqueue");
            return Ok(EnqueueSummary { queued: 0 });
        }

        let jobs = self.enqueue_bulk(&sources).await?;
        Ok(EnqueueSummary { queued: jobs.len() })
    }
}
