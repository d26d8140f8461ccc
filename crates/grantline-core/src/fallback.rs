use std::sync::Arc;
use std::time::Duration;

use crate::crawler::parse_http_url;
use crate::error::AppError;
use crate::extraction::{ExtractionStrategy, HeadingPatterns};
use crate::models::Page;
use crate::traits::{FetchRequest, Fetcher, fetch_bounded};

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub timeout: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
        }
    }
}

/// Single-page extractor used when the crawler fails.
///
/// Makes exactly one fetch and follows no links. Returned pages carry no
/// raw content.
#[derive(Clone)]
pub struct FallbackExtractor<F: Fetcher> {
    fetcher: F,
    strategy: Arc<dyn ExtractionStrategy>,
    config: FallbackConfig,
}

impl<F: Fetcher> FallbackExtractor<F> {
    pub fn new(fetcher: F, config: FallbackConfig) -> Self {
        Self {
            fetcher,
            strategy: Arc::new(HeadingPatterns::default()),
            config,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub async fn extract(&self, url: &str) -> Result<Page, AppError> {
        parse_http_url(url)?;

        let request = FetchRequest::get(url, self.config.timeout);
        let body = fetch_bounded(&self.fetcher, &request).await?;
        let html = String::from_utf8_lossy(&body);

        let grants = self.strategy.grants(&html, url);
        tracing::info!(%url, grants = grants.len(), "Fallback extraction complete");

        Ok(Page {
            url: url.to_string(),
            title: self.strategy.title(&html),
            content: String::new(),
            grants,
            links: Vec::new(),
            depth: 0,
        })
    }
}
