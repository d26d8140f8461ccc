use std::time::Duration;

use super::SourceHandler;
use crate::error::AppError;
use crate::models::{GrantStatus, ScrapeMethod, ScrapeOutcome, ScrapedGrant, Source, SourceType};
use crate::traits::{FetchRequest, Fetcher, TextExtractor, fetch_bounded};

const MAX_TITLE_CHARS: usize = 180;
const MAX_DESCRIPTION_CHARS: usize = 2000;

/// Turns a fetched document into at most one grant.
#[derive(Clone)]
pub struct DocumentHandler<F: Fetcher, T: TextExtractor> {
    fetcher: F,
    extractor: T,
    timeout: Duration,
}

impl<F: Fetcher, T: TextExtractor> DocumentHandler<F, T> {
    pub fn new(fetcher: F, extractor: T) -> Self {
        Self {
            fetcher,
            extractor,
            timeout: Duration::from_secs(30),
        }
    }

    async fn fetch_grants(&self, source: &Source) -> Result<Vec<ScrapedGrant>, AppError> {
        let request = FetchRequest::get(&source.url, self.timeout);
        let bytes = fetch_bounded(&self.fetcher, &request).await?;
        let text = self.extractor.extract_text(&bytes)?;

        Ok(grant_from_text(&text, &source.url).into_iter().collect())
    }
}

impl<F: Fetcher, T: TextExtractor> SourceHandler for DocumentHandler<F, T> {
    fn can_handle(&self, source: &Source) -> bool {
        source.source_type == SourceType::Document
    }

    async fn scrape(&self, source: &Source) -> ScrapeOutcome {
        match self.fetch_grants(source).await {
            Ok(grants) => ScrapeOutcome::success(grants, ScrapeMethod::Document),
            Err(e) => {
                tracing::warn!(source_id = %source.id, url = %source.url, error = %e, "Document handler failed");
                ScrapeOutcome::failure(ScrapeMethod::Document, e.to_string())
            }
        }
    }
}

/// First non-empty line is the title; the remaining lines, whitespace
/// collapsed, are the description. A single-line document uses its only
/// line for both.
fn grant_from_text(text: &str, url: &str) -> Option<ScrapedGrant> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.next()?;

    let rest = lines.collect::<Vec<_>>().join(" ");
    let body = if rest.is_empty() { first } else { rest.as_str() };
    let description: String = body
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_DESCRIPTION_CHARS)
        .collect();

    let mut grant = ScrapedGrant::new(first.chars().take(MAX_TITLE_CHARS).collect::<String>(), description);
    grant.url = Some(url.to_string());
    grant.status = Some(GrantStatus::Open);
    Some(grant)
}
