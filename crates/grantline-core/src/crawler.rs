use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::AppError;
use crate::extraction::{CrawlPatterns, ExtractionStrategy};
use crate::models::Page;
use crate::traits::{FetchRequest, Fetcher, fetch_bounded};

/// Bounds of a single crawl.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_pages: usize,
    /// Pages are fetched at depths `0..max_depth`.
    pub max_depth: usize,
    pub page_timeout: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 5,
            max_depth: 2,
            page_timeout: Duration::from_secs(30),
        }
    }
}

impl CrawlConfig {
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }
}

/// Depth- and page-bounded multi-page crawler.
///
/// Pages are fetched one at a time in depth-first order, following only
/// links on the start page's host. The visited set compares raw URL strings.
#[derive(Clone)]
pub struct Crawler<F: Fetcher> {
    fetcher: F,
    strategy: Arc<dyn ExtractionStrategy>,
    config: CrawlConfig,
}

impl<F: Fetcher> Crawler<F> {
    pub fn new(fetcher: F, config: CrawlConfig) -> Self {
        Self::with_strategy(fetcher, config, Arc::new(CrawlPatterns::default()))
    }

    pub fn with_strategy(
        fetcher: F,
        config: CrawlConfig,
        strategy: Arc<dyn ExtractionStrategy>,
    ) -> Self {
        Self {
            fetcher,
            strategy,
            config,
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Crawls from `start_url`.
    ///
    /// Only a failure on the start page is returned as an error; sub-page
    /// failures are logged and skipped.
    pub async fn crawl(&self, start_url: &str) -> Result<Vec<Page>, AppError> {
        let start = parse_http_url(start_url)?;
        let host = start.host_str().unwrap_or_default().to_string();

        tracing::info!(url = %start_url, "Starting crawl");

        let mut visited: HashSet<String> = HashSet::new();
        let mut pages: Vec<Page> = Vec::new();
        let mut frontier: Vec<(String, usize)> = vec![(start_url.to_string(), 0)];

        while let Some((url, depth)) = frontier.pop() {
            if pages.len() >= self.config.max_pages {
                tracing::debug!(max_pages = self.config.max_pages, "Page limit reached");
                break;
            }
            if depth >= self.config.max_depth {
                continue;
            }
            if !visited.insert(url.clone()) {
                tracing::debug!(%url, "Skipping already visited URL");
                continue;
            }

            tracing::debug!(%url, depth, "Crawling page");
            let page = match self.fetch_page(&url, depth, &host).await {
                Ok(page) => page,
                Err(e) if depth == 0 => {
                    tracing::warn!(%url, error = %e, "Start page failed");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Failed to crawl page");
                    continue;
                }
            };

            if depth + 1 < self.config.max_depth {
                for link in page.links.iter().rev() {
                    if !visited.contains(link) {
                        frontier.push((link.clone(), depth + 1));
                    }
                }
            }
            pages.push(page);
        }

        tracing::info!(url = %start_url, pages = pages.len(), "Crawl complete");
        Ok(pages)
    }

    async fn fetch_page(&self, url: &str, depth: usize, host: &str) -> Result<Page, AppError> {
        let request = FetchRequest::get(url, self.config.page_timeout);
        let body = fetch_bounded(&self.fetcher, &request).await?;
        let html = String::from_utf8_lossy(&body).into_owned();

        let page_url = Url::parse(url).map_err(|e| AppError::InvalidUrl(e.to_string()))?;

        Ok(Page {
            url: url.to_string(),
            title: self.strategy.title(&html),
            grants: self.strategy.grants(&html, url),
            links: self.strategy.links(&html, &page_url, host),
            depth,
            content: html,
        })
    }
}

/// Validates an absolute http(s) URL with a host.
pub fn parse_http_url(raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw.trim()).map_err(|e| AppError::InvalidUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AppError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}
