use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::crawler::{CrawlConfig, parse_http_url};
use crate::error::AppError;
use crate::fallback::FallbackConfig;
use crate::handlers::{ApiHandler, Dispatcher, DocumentHandler, FeedHandler, HtmlHandler};
use crate::models::{
    EscalationOutcome, LogStatus, NewScrapeLog, RunAllSummary, ScrapeLog, ScrapeLogResult,
    ScrapePersistResult, ScrapedGrant, Source,
};
use crate::tiers::TieredScraper;
use crate::traits::{Enricher, Fetcher, Notifier, SourceRunner, Storage, TextExtractor};

/// Default number of log entries returned when no limit is given.
pub const DEFAULT_LOG_LIMIT: usize = 10;
/// Hard cap on log entries per request.
pub const MAX_LOG_LIMIT: usize = 50;

/// The ingestion pipeline: dispatch a source to its handler, persist the
/// grants, record an audit log and notify about new grants.
///
/// Generic over all external dependencies via traits, enabling dependency injection
/// and testability without real HTTP or database calls.
#[derive(Clone)]
pub struct ScrapeService<F, E, T, S, N>
where
    F: Fetcher,
    E: Enricher,
    T: TextExtractor,
    S: Storage,
    N: Notifier,
{
    tiers: Arc<TieredScraper>,
    dispatcher: Dispatcher<F, E, T>,
    store: S,
    notifier: N,
}

impl<F, E, T, S, N> ScrapeService<F, E, T, S, N>
where
    F: Fetcher + 'static,
    E: Enricher,
    T: TextExtractor,
    S: Storage,
    N: Notifier,
{
    pub fn new(fetcher: F, enricher: E, extractor: T, store: S, notifier: N) -> Self {
        Self::with_configs(
            fetcher,
            enricher,
            extractor,
            store,
            notifier,
            CrawlConfig::default(),
            FallbackConfig::default(),
        )
    }

    pub fn with_configs(
        fetcher: F,
        enricher: E,
        extractor: T,
        store: S,
        notifier: N,
        crawl: CrawlConfig,
        fallback: FallbackConfig,
    ) -> Self {
        let tiers = Arc::new(TieredScraper::standard(fetcher.clone(), crawl, fallback));
        let dispatcher = Dispatcher::new(
            HtmlHandler::new(Arc::clone(&tiers), enricher),
            ApiHandler::new(fetcher.clone()),
            FeedHandler::new(fetcher.clone()),
            DocumentHandler::new(fetcher, extractor),
        );
        Self {
            tiers,
            dispatcher,
            store,
            notifier,
        }
    }

    /// Runs the tier chain against an arbitrary URL without persisting.
    ///
    /// Only a malformed URL is an error; scrape failures are reported in the outcome.
    pub async fn scrape_url(&self, url: &str) -> Result<EscalationOutcome, AppError> {
        parse_http_url(url)?;
        Ok(self.tiers.scrape_with_fallback(url).await)
    }

    /// Fails with `SourceNotFound` for an unknown id.
    pub async fn run_source_by_id(&self, source_id: Uuid) -> Result<ScrapePersistResult, AppError> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or_else(|| AppError::SourceNotFound(source_id.to_string()))?;
        self.scrape_and_persist(&source).await
    }

    /// Runs every active source in turn. A failing source is reported in the
    /// summary and does not stop the run.
    pub async fn run_all_active_sources(&self) -> Result<RunAllSummary, AppError> {
        let sources = self.store.list_active_sources().await?;
        tracing::info!(sources = sources.len(), "Running all active sources");

        let mut details = Vec::with_capacity(sources.len());
        for source in &sources {
            let result = match self.scrape_and_persist(source).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(source_id = %source.id, error = %e, "Source run failed");
                    ScrapePersistResult {
                        source_id: source.id,
                        source_name: source.name.clone(),
                        method: crate::models::ScrapeMethod::Error,
                        success: false,
                        saved: 0,
                        grant_count: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            details.push(result);
        }

        Ok(RunAllSummary {
            sources_processed: details.len(),
            total_saved: details.iter().map(|d| d.saved).sum(),
            details,
        })
    }

    /// Dispatches `source`, saves new grants, touches `last_run`, appends a
    /// scrape log and notifies. Storage errors propagate; notifier errors do not.
    pub async fn scrape_and_persist(&self, source: &Source) -> Result<ScrapePersistResult, AppError> {
        let outcome = self.dispatcher.dispatch(source).await;
        let success = outcome.is_success();

        let valid: Vec<ScrapedGrant> = outcome
            .grants
            .iter()
            .filter(|g| g.is_valid())
            .cloned()
            .collect();
        let saved = if valid.is_empty() {
            Vec::new()
        } else {
            self.store.save_new_grants(source, &valid).await?
        };

        let now = Utc::now();
        self.store.touch_last_run(source.id, now).await?;
        self.store
            .append_log(&NewScrapeLog {
                source_id: source.id,
                status: if success { LogStatus::Success } else { LogStatus::Error },
                result: ScrapeLogResult {
                    method: outcome.method,
                    grant_count: outcome.grants.len(),
                    saved_count: saved.len(),
                    error: outcome.error.clone(),
                },
                timestamp: now,
            })
            .await?;

        if !saved.is_empty() {
            if let Err(e) = self.notifier.notify_new_grants(source, &saved).await {
                tracing::warn!(source_id = %source.id, error = %e, "Notification failed");
            }
        }

        tracing::info!(
            source_id = %source.id,
            method = %outcome.method,
            found = outcome.grants.len(),
            saved = saved.len(),
            success,
            "Source processed"
        );

        Ok(ScrapePersistResult {
            source_id: source.id,
            source_name: source.name.clone(),
            method: outcome.method,
            success,
            saved: saved.len(),
            grant_count: outcome.grants.len(),
            error: outcome.error,
        })
    }

    /// Newest first; `limit` defaults to 10 (also for 0) and is capped at 50.
    pub async fn get_logs_for_source(
        &self,
        source_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<ScrapeLog>, AppError> {
        self.store
            .recent_logs(source_id, normalize_log_limit(limit))
            .await
    }
}

impl<F, E, T, S, N> SourceRunner for ScrapeService<F, E, T, S, N>
where
    F: Fetcher + 'static,
    E: Enricher,
    T: TextExtractor,
    S: Storage,
    N: Notifier,
{
    async fn run_source(&self, source_id: Uuid) -> Result<ScrapePersistResult, AppError> {
        self.run_source_by_id(source_id).await
    }
}

/// A missing or zero limit means the default.
pub fn normalize_log_limit(limit: Option<usize>) -> usize {
    match limit {
        None | Some(0) => DEFAULT_LOG_LIMIT,
        Some(n) => n.min(MAX_LOG_LIMIT),
    }
}
