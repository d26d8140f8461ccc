pub mod crawler;
pub mod enqueue;
pub mod error;
pub mod extraction;
pub mod fallback;
pub mod handlers;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod scheduler;
pub mod scrape;
pub mod tiers;
pub mod traits;
pub mod worker;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use crawler::{CrawlConfig, Crawler};
pub use enqueue::{ActiveSourceEnqueuer, EnqueueService, EnqueueSummary};
pub use error::AppError;
pub use fallback::{FallbackConfig, FallbackExtractor};
pub use handlers::Dispatcher;
pub use job::{JobResult, JobStatus, NewScrapeJob, RetentionPolicy, RetryConfig, ScrapeJob, WorkerConfig};
pub use job_queue::JobQueue;
pub use models::{
    EscalationOutcome, GrantStatus, Page, RunAllSummary, SavedGrant, ScrapeLog, ScrapeMethod,
    ScrapeOutcome, ScrapePersistResult, ScrapedGrant, Source, SourceType,
};
pub use scheduler::{Scheduler, SchedulerConfig, TickOutcome};
pub use scrape::ScrapeService;
pub use tiers::TieredScraper;
pub use traits::{
    Enricher, Fetcher, GrantStore, Notifier, ScrapeLogStore, SourceRegistry, SourceRunner,
    Storage, TextExtractor,
};
pub use worker::{TracingWorkerReporter, WorkerReporter, WorkerService};
