use grantline_client::{DataServiceEnricher, EnrichmentConfig, PdfTextExtractor, ReqwestFetcher};
use grantline_core::traits::LogNotifier;
use grantline_core::{AppError, EnqueueService, ScrapeService};
use grantline_db::{Database, ScrapeJobRepository};

/// The pipeline wired to real HTTP, the enrichment service and PostgreSQL.
pub type Pipeline =
    ScrapeService<ReqwestFetcher, DataServiceEnricher, PdfTextExtractor, Database, LogNotifier>;

pub type Enqueuer = EnqueueService<ScrapeJobRepository, Database>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    pub api_key: String,
    pub pipeline: Pipeline,
    pub enqueuer: Enqueuer,
}

impl AppState {
    pub fn new(db: Database, api_key: String, enrichment: EnrichmentConfig) -> Result<Self, AppError> {
        let pipeline = ScrapeService::new(
            ReqwestFetcher::new()?,
            DataServiceEnricher::new(enrichment)?,
            PdfTextExtractor,
            db.clone(),
            LogNotifier,
        );
        let enqueuer = EnqueueService::new(db.job_repo(), db.clone());

        Ok(Self {
            db,
            api_key,
            pipeline,
            enqueuer,
        })
    }
}
