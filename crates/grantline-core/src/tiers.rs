use async_trait::async_trait;

use crate::crawler::{CrawlConfig, Crawler};
use crate::error::AppError;
use crate::fallback::{FallbackConfig, FallbackExtractor};
use crate::models::{EscalationOutcome, Page, ScrapeMethod};
use crate::traits::Fetcher;

/// One ranked extraction strategy in the escalation chain.
#[async_trait]
pub trait ScrapeTier: Send + Sync {
    /// Method tag reported when this tier produces the result.
    fn method(&self) -> ScrapeMethod;

    async fn run(&self, url: &str) -> Result<Vec<Page>, AppError>;
}

#[async_trait]
impl<F: Fetcher + 'static> ScrapeTier for Crawler<F> {
    fn method(&self) -> ScrapeMethod {
        ScrapeMethod::Smart
    }

    async fn run(&self, url: &str) -> Result<Vec<Page>, AppError> {
        self.crawl(url).await
    }
}

#[async_trait]
impl<F: Fetcher + 'static> ScrapeTier for FallbackExtractor<F> {
    fn method(&self) -> ScrapeMethod {
        ScrapeMethod::Generic
    }

    async fn run(&self, url: &str) -> Result<Vec<Page>, AppError> {
        Ok(vec![self.extract(url).await?])
    }
}

/// Tries each tier in order until one succeeds.
///
/// Never returns an error: tier failures are logged and exhaustion is
/// reported as an `EscalationOutcome` with `method = error`.
pub struct TieredScraper {
    tiers: Vec<Box<dyn ScrapeTier>>,
}

impl TieredScraper {
    pub fn new(tiers: Vec<Box<dyn ScrapeTier>>) -> Self {
        Self { tiers }
    }

    /// Crawler first, then the single-page fallback.
    pub fn standard<F: Fetcher + 'static>(
        fetcher: F,
        crawl: CrawlConfig,
        fallback: FallbackConfig,
    ) -> Self {
        Self::new(vec![
            Box::new(Crawler::new(fetcher.clone(), crawl)),
            Box::new(FallbackExtractor::new(fetcher, fallback)),
        ])
    }

    pub async fn scrape_with_fallback(&self, url: &str) -> EscalationOutcome {
        for tier in &self.tiers {
            let method = tier.method();
            match tier.run(url).await {
                Ok(pages) => {
                    let grant_count = pages.iter().map(|p| p.grants.len()).sum();
                    tracing::info!(%url, %method, pages = pages.len(), grant_count, "Tier succeeded");
                    return EscalationOutcome {
                        success: true,
                        pages,
                        method,
                        error: None,
                        grant_count,
                    };
                }
                Err(e) => {
                    tracing::warn!(%url, %method, error = %e, "Tier failed, escalating");
                }
            }
        }

        tracing::error!(%url, "All scraping tiers exhausted");
        EscalationOutcome::exhausted()
    }
}
