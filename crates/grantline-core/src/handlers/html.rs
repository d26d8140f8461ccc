use std::sync::Arc;

use super::SourceHandler;
use crate::models::{Page, ScrapeOutcome, ScrapedGrant, Source, SourceType};
use crate::tiers::TieredScraper;
use crate::traits::{Enricher, EnrichmentRequest};

/// Upper bound of HTML characters sent to the enrichment service.
const MAX_ENRICHMENT_CHARS: usize = 1_000_000;

/// Scrapes HTML sources through the tier chain, optionally enriching the
/// result with the AI extraction service.
#[derive(Clone)]
pub struct HtmlHandler<E: Enricher> {
    scraper: Arc<TieredScraper>,
    enricher: E,
}

impl<E: Enricher> HtmlHandler<E> {
    pub fn new(scraper: Arc<TieredScraper>, enricher: E) -> Self {
        Self { scraper, enricher }
    }

    async fn enrich(&self, source: &Source, pages: &[Page], grants: &mut Vec<ScrapedGrant>) {
        let Some(page) = pages.iter().find(|p| !p.content.is_empty()) else {
            tracing::debug!(source_id = %source.id, "No raw HTML available for enrichment");
            return;
        };

        let request = EnrichmentRequest {
            html: truncate_chars(&page.content, MAX_ENRICHMENT_CHARS).to_string(),
            url: page.url.clone(),
            source: source.name.clone(),
        };

        match self.enricher.enrich(&request).await {
            Ok(Some(mut enriched)) if enriched.is_valid() => {
                if enriched.url.is_none() {
                    enriched.url = Some(page.url.clone());
                }
                merge_enriched(grants, enriched);
            }
            Ok(_) => {
                tracing::debug!(source_id = %source.id, "Enrichment returned no grant");
            }
            Err(e) => {
                tracing::warn!(source_id = %source.id, error = %e, "Enrichment failed, keeping pattern results");
            }
        }
    }
}

impl<E: Enricher> SourceHandler for HtmlHandler<E> {
    fn can_handle(&self, source: &Source) -> bool {
        source.source_type == SourceType::Html
    }

    async fn scrape(&self, source: &Source) -> ScrapeOutcome {
        let outcome = self.scraper.scrape_with_fallback(&source.url).await;
        if !outcome.success {
            return ScrapeOutcome {
                grants: Vec::new(),
                method: outcome.method,
                error: outcome.error,
            };
        }

        let mut grants = outcome.grants();
        if enrichment_enabled(&source.metadata) {
            self.enrich(source, &outcome.pages, &mut grants).await;
        }

        ScrapeOutcome::success(grants, outcome.method)
    }
}

/// AI extraction is switched on by `aiExtraction: true` or `ai.enabled: true`
/// (the `ia` spellings are accepted too).
pub(crate) fn enrichment_enabled(metadata: &serde_json::Value) -> bool {
    for flag in ["aiExtraction", "iaExtraction"] {
        if let Some(enabled) = metadata.get(flag).and_then(|v| v.as_bool()) {
            return enabled;
        }
    }
    ["ai", "ia"].iter().any(|key| {
        metadata
            .get(*key)
            .and_then(|cfg| cfg.get("enabled"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    })
}

/// Merges an enriched grant into `grants` by case-insensitive title.
///
/// A matching grant only has its empty fields filled; otherwise the enriched
/// grant is appended.
pub(crate) fn merge_enriched(grants: &mut Vec<ScrapedGrant>, enriched: ScrapedGrant) {
    let key = enriched.title.trim().to_lowercase();
    match grants
        .iter_mut()
        .find(|g| g.title.trim().to_lowercase() == key)
    {
        Some(existing) => {
            if existing.description.trim().is_empty() {
                existing.description = enriched.description;
            }
            if existing.amount.is_none() {
                existing.amount = enriched.amount;
            }
            if existing.deadline.is_none() {
                existing.deadline = enriched.deadline;
            }
            if existing.url.is_none() {
                existing.url = enriched.url;
            }
        }
        None => grants.push(enriched),
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::CrawlConfig;
    use crate::error::AppError;
    use crate::fallback::FallbackConfig;
    use crate::models::ScrapeMethod;
    use crate::testutil::{MockEnricher, MockFetcher, make_source};

    const URL: &str = "https://html.example/";
    const PAGE: &str = "<h2>Green Energy Grant</h2><p>Solar support</p>";

    fn handler(fetcher: MockFetcher, enricher: MockEnricher) -> HtmlHandler<MockEnricher> {
        let tiers = TieredScraper::standard(fetcher, CrawlConfig::default(), FallbackConfig::default());
        HtmlHandler::new(Arc::new(tiers), enricher)
    }

    fn ai_source() -> Source {
        let mut source = make_source(SourceType::Html, URL);
        source.metadata = serde_json::json!({"aiExtraction": true});
        source
    }

    #[tokio::test]
    async fn returns_tier_grants_without_enrichment() {
        let enricher = MockEnricher::none();
        let h = handler(MockFetcher::new().with_page(URL, PAGE), enricher.clone());

        let outcome = h.scrape(&make_source(SourceType::Html, URL)).await;
        assert_eq!(outcome.method, ScrapeMethod::Smart);
        assert_eq!(outcome.grants.len(), 1);
        assert!(enricher.requests().is_empty());
    }

    #[tokio::test]
    async fn enrichment_fills_only_empty_fields_of_matching_grant() {
        let mut enriched = ScrapedGrant::new("green energy grant ", "Other text");
        enriched.amount = Some(50_000.0);
        enriched.url = Some("https://elsewhere.example".into());
        let enricher = MockEnricher::returning(enriched);
        let h = handler(MockFetcher::new().with_page(URL, PAGE), enricher.clone());

        let outcome = h.scrape(&ai_source()).await;
        assert_eq!(outcome.grants.len(), 1);
        let grant = &outcome.grants[0];
        assert_eq!(grant.description, "Solar support");
        assert_eq!(grant.amount, Some(50_000.0));
        assert_eq!(grant.url.as_deref(), Some(URL));

        let requests = enricher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, URL);
        assert_eq!(requests[0].source, "Test source");
    }

    #[tokio::test]
    async fn enrichment_appends_new_grant_with_page_url() {
        let enricher = MockEnricher::returning(ScrapedGrant::new("Water Fund", "Irrigation aid"));
        let h = handler(MockFetcher::new().with_page(URL, PAGE), enricher);

        let outcome = h.scrape(&ai_source()).await;
        assert_eq!(outcome.grants.len(), 2);
        assert_eq!(outcome.grants[1].title, "Water Fund");
        assert_eq!(outcome.grants[1].url.as_deref(), Some(URL));
    }

    #[tokio::test]
    async fn enrichment_errors_are_swallowed() {
        let enricher = MockEnricher::failing(AppError::EnrichmentError("HTTP 502".into()));
        let h = handler(MockFetcher::new().with_page(URL, PAGE), enricher);

        let outcome = h.scrape(&ai_source()).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.grants.len(), 1);
    }

    #[tokio::test]
    async fn fallback_pages_are_not_enriched() {
        let enricher = MockEnricher::returning(ScrapedGrant::new("Water Fund", "Irrigation aid"));
        let fetcher = MockFetcher::new()
            .with_error(URL, AppError::Timeout(30_000))
            .with_page(URL, "<h2>Green Energy Grant</h2><p>Solar support for homes</p>");
        let h = handler(fetcher, enricher.clone());

        let outcome = h.scrape(&ai_source()).await;
        assert_eq!(outcome.method, ScrapeMethod::Generic);
        assert_eq!(outcome.grants.len(), 1);
        assert!(enricher.requests().is_empty());
    }

    #[tokio::test]
    async fn exhausted_tiers_yield_error_outcome() {
        let h = handler(MockFetcher::new(), MockEnricher::none());
        let outcome = h.scrape(&make_source(SourceType::Html, URL)).await;
        assert_eq!(outcome.method, ScrapeMethod::Error);
        assert!(outcome.grants.is_empty());
        assert!(outcome.error.is_some());
    }

    #[test]
    fn enrichment_flags() {
        assert!(enrichment_enabled(&serde_json::json!({"aiExtraction": true})));
        assert!(enrichment_enabled(&serde_json::json!({"ai": {"enabled": true}})));
        assert!(enrichment_enabled(&serde_json::json!({"iaExtraction": true})));
        assert!(!enrichment_enabled(&serde_json::json!({"aiExtraction": false, "ai": {"enabled": true}})));
        assert!(!enrichment_enabled(&serde_json::Value::Null));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("€€€", 2), "€€");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn can_handle_only_html() {
        let h = handler(MockFetcher::new(), MockEnricher::none());
        assert!(h.can_handle(&make_source(SourceType::Html, URL)));
        assert!(!h.can_handle(&make_source(SourceType::Feed, URL)));
    }
}
