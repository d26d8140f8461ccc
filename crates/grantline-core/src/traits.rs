use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{NewScrapeLog, SavedGrant, ScrapeLog, ScrapePersistResult, ScrapedGrant, Source};

/// A single bounded HTTP request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Fetches the raw body behind a URL.
///
/// Implementations must fail with `HttpError` on a non-2xx status and should
/// honour `request.timeout`; callers additionally bound the call with
/// [`fetch_bounded`].
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;
}

/// Runs a fetch under the request's timeout, mapping expiry to `AppError::Timeout`.
pub async fn fetch_bounded<F: Fetcher>(
    fetcher: &F,
    request: &FetchRequest,
) -> Result<Vec<u8>, AppError> {
    match tokio::time::timeout(request.timeout, fetcher.fetch(request)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(request.timeout.as_millis() as u64)),
    }
}

/// Payload sent to the AI enrichment service.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentRequest {
    pub html: String,
    pub url: String,
    /// Human-readable source name.
    pub source: String,
}

/// Asks an external service to extract one grant from raw page HTML.
pub trait Enricher: Send + Sync + Clone {
    /// Returns `Ok(None)` when the service answered without a usable grant.
    fn enrich(
        &self,
        request: &EnrichmentRequest,
    ) -> impl Future<Output = Result<Option<ScrapedGrant>, AppError>> + Send;
}

/// Enricher used when no enrichment service is configured.
#[derive(Debug, Clone, Default)]
pub struct NoEnricher;

impl Enricher for NoEnricher {
    async fn enrich(&self, _request: &EnrichmentRequest) -> Result<Option<ScrapedGrant>, AppError> {
        Ok(None)
    }
}

/// Turns a fetched document (PDF or plain text) into text.
pub trait TextExtractor: Send + Sync + Clone {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, AppError>;
}

/// Read access to the source registry.
pub trait SourceRegistry: Send + Sync + Clone {
    fn get_source(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Source>, AppError>> + Send;

    fn list_active_sources(&self) -> impl Future<Output = Result<Vec<Source>, AppError>> + Send;

    fn touch_last_run(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Persists scraped grants for a source.
pub trait GrantStore: Send + Sync + Clone {
    /// Saves every grant not already stored for `source`; returns only the new ones.
    fn save_new_grants(
        &self,
        source: &Source,
        grants: &[ScrapedGrant],
    ) -> impl Future<Output = Result<Vec<SavedGrant>, AppError>> + Send;
}

/// Append-only audit trail of source runs.
pub trait ScrapeLogStore: Send + Sync + Clone {
    fn append_log(&self, log: &NewScrapeLog) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    /// Most recent entries first.
    fn recent_logs(
        &self,
        source_id: Uuid,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScrapeLog>, AppError>> + Send;
}

/// Everything the pipeline needs from persistence.
pub trait Storage: SourceRegistry + GrantStore + ScrapeLogStore {}

impl<T> Storage for T where T: SourceRegistry + GrantStore + ScrapeLogStore {}

/// Receives newly persisted grants.
pub trait Notifier: Send + Sync + Clone {
    fn notify_new_grants(
        &self,
        source: &Source,
        grants: &[SavedGrant],
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify_new_grants(&self, source: &Source, grants: &[SavedGrant]) -> Result<(), AppError> {
        if !grants.is_empty() {
            tracing::info!(source_id = %source.id, count = grants.len(), "New grants persisted");
        }
        Ok(())
    }
}

/// Runs one source end to end (dispatch + persistence). Used by the worker.
pub trait SourceRunner: Send + Sync + Clone {
    fn run_source(
        &self,
        source_id: Uuid,
    ) -> impl Future<Output = Result<ScrapePersistResult, AppError>> + Send;
}
