//! Pattern-based HTML extraction.
//!
//! The crawler and the fallback extractor only see the [`ExtractionStrategy`]
//! trait, so the regex implementations here can be swapped for a DOM-based
//! one without touching either tier.

use std::collections::HashSet;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::models::ScrapedGrant;

static TITLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<title[^>]*>([^<]*)</title>").expect("title regex"));
static H1_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<h1[^>]*>([^<]*)</h1>").expect("h1 regex"));

static HEADING_THEN_PARAGRAPH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<h[23][^>]*>([^<]+)</h[23]>.*?<p[^>]*>([^<]+)</p>")
        .expect("heading/paragraph regex")
});
static STRONG_THEN_PARAGRAPH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(?:strong|b)(?:\s[^>]*)?>([^<]+)</(?:strong|b)>.*?<p[^>]*>([^<]+)</p>")
        .expect("strong/paragraph regex")
});
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<h[23][^>]*>([^<]+)</h[23]>").expect("heading regex"));
static PARAGRAPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<p[^>]*>([^<]+)</p>").expect("paragraph regex"));

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("script regex"));
static STYLE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("style regex"));

static AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[€$]\s*(\d{1,3}(?:[,.]\d{3})*)").expect("amount regex"));
static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4}|\d{1,2}-\d{1,2}-\d{4})")
        .expect("date regex")
});

static ANCHOR_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<a[^>]*href=["']([^"']+)["'][^>]*>"#).expect("anchor regex"));
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

/// Extracts page-level information from raw HTML.
pub trait ExtractionStrategy: Send + Sync {
    fn title(&self, html: &str) -> String;

    /// Grant candidates found on the page, capped by the strategy.
    fn grants(&self, html: &str, page_url: &str) -> Vec<ScrapedGrant>;

    /// Followable links of the page. Strategies that do not follow links
    /// return nothing.
    fn links(&self, _html: &str, _page_url: &Url, _allowed_host: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Strategy used by the multi-page crawler.
///
/// Matches "heading then paragraph" and "bold then paragraph" blocks, pairs
/// currency amounts with grants in document order and applies the first date
/// on the page to every grant.
#[derive(Debug, Clone)]
pub struct CrawlPatterns {
    pub max_grants: usize,
    pub max_links: usize,
}

impl Default for CrawlPatterns {
    fn default() -> Self {
        Self {
            max_grants: 10,
            max_links: 20,
        }
    }
}

impl ExtractionStrategy for CrawlPatterns {
    fn title(&self, html: &str) -> String {
        page_title(html).unwrap_or_else(|| "Untitled Page".to_string())
    }

    fn grants(&self, html: &str, page_url: &str) -> Vec<ScrapedGrant> {
        let mut grants = Vec::new();

        for pattern in [&*HEADING_THEN_PARAGRAPH, &*STRONG_THEN_PARAGRAPH] {
            for caps in pattern.captures_iter(html) {
                let title = decode_text(&caps[1]);
                let description = decode_text(&caps[2]);
                if title.chars().count() > 5 && !description.is_empty() {
                    let mut grant = ScrapedGrant::new(title, description);
                    grant.url = Some(page_url.to_string());
                    grants.push(grant);
                }
            }
        }

        let mut amounts = AMOUNT.captures_iter(html).map(|c| parse_amount(&c[1]));
        for grant in grants.iter_mut() {
            match amounts.next() {
                Some(amount) => grant.amount = amount,
                None => break,
            }
        }

        if let Some(date) = DATE.find(html) {
            let deadline = normalize_date(date.as_str());
            for grant in grants.iter_mut() {
                grant.deadline = Some(deadline.clone());
            }
        }

        grants.truncate(self.max_grants);
        grants
    }

    fn links(&self, html: &str, page_url: &Url, allowed_host: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for caps in ANCHOR_HREF.captures_iter(html) {
            let href = caps[1].trim();
            if href.starts_with('#') || href.to_lowercase().starts_with("javascript:") {
                continue;
            }
            let Ok(resolved) = page_url.join(href) else {
                continue;
            };
            if !is_followable(&resolved, allowed_host) {
                continue;
            }
            let link = resolved.to_string();
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }

        links.truncate(self.max_links);
        links
    }
}

/// Reduced strategy used by the single-page fallback extractor.
///
/// Only headings are matched. Each grant reads its description, amount and
/// deadline from the markup that follows its heading.
#[derive(Debug, Clone)]
pub struct HeadingPatterns {
    pub max_grants: usize,
}

impl Default for HeadingPatterns {
    fn default() -> Self {
        Self { max_grants: 20 }
    }
}

impl ExtractionStrategy for HeadingPatterns {
    fn title(&self, html: &str) -> String {
        page_title(html).unwrap_or_else(|| "Page".to_string())
    }

    fn grants(&self, html: &str, _page_url: &str) -> Vec<ScrapedGrant> {
        let without_scripts = SCRIPT_BLOCK.replace_all(html, "");
        let clean = STYLE_BLOCK.replace_all(&without_scripts, "");

        let mut grants = Vec::new();
        for caps in HEADING.captures_iter(&clean) {
            if grants.len() >= self.max_grants {
                break;
            }

            let title = decode_text(&caps[1]);
            let title_len = title.chars().count();
            if title_len <= 5 || title_len >= 200 {
                continue;
            }

            let Some(whole) = caps.get(0) else { continue };
            let after = &clean[whole.end()..];
            let description = PARAGRAPH
                .captures(after)
                .map(|p| decode_text(&p[1]))
                .unwrap_or_else(|| title.clone());
            if description.chars().count() <= 10 {
                continue;
            }

            let mut grant = ScrapedGrant::new(title, description);
            grant.amount = AMOUNT.captures(after).and_then(|c| parse_amount(&c[1]));
            grant.deadline = DATE.find(after).map(|d| normalize_date(d.as_str()));
            grants.push(grant);
        }
        grants
    }
}

fn page_title(html: &str) -> Option<String> {
    [&*TITLE_TAG, &*H1_TAG].iter().find_map(|re| {
        re.captures(html)
            .map(|c| decode_text(&c[1]))
            .filter(|t| !t.is_empty())
    })
}

fn is_followable(url: &Url, allowed_host: &str) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    if url.host_str() != Some(allowed_host) {
        return false;
    }
    let s = url.as_str();
    !s.contains(".pdf") && !s.contains("logout")
}

/// Parses a currency amount by dropping thousands separators.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse::<f64>().ok()
}

/// Parses the date spellings found on grant pages (`YYYY-MM-DD`, `D/M/YYYY`, `D-M-YYYY`).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// ISO date when `raw` parses, otherwise `raw` unchanged.
pub fn normalize_date(raw: &str) -> String {
    match parse_date(raw) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => raw.to_string(),
    }
}

/// Strips tags, decodes entities and collapses whitespace.
pub fn text_content(html: &str) -> String {
    let stripped = TAGS.replace_all(html, " ");
    let decoded = html_escape::decode_html_entities(&stripped);
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

fn decode_text(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRANTS_PAGE: &str = r#"
        <html><head><title>Open Calls</title></head><body>
        <h2>Innovation Vouchers</h2>
        <p>Funding for small businesses adopting new technology.</p>
        <span>Up to €25,000</span>
        <h3>Export Support</h3>
        <p>Help for companies entering new markets.</p>
        <span>$1.500.000 available</span>
        <p>Deadline: 31/12/2026</p>
        <strong>Short</strong><p>Ignored because the title is short.</p>
        </body></html>
    "#;

    #[test]
    fn crawl_patterns_pair_amounts_and_share_first_date() {
        let grants = CrawlPatterns::default().grants(GRANTS_PAGE, "https://gov.example/calls");

        assert_eq!(grants.len(), 2);
        assert_eq!(grants[0].title, "Innovation Vouchers");
        assert_eq!(grants[0].amount, Some(25_000.0));
        assert_eq!(grants[1].amount, Some(1_500_000.0));
        assert_eq!(grants[0].deadline.as_deref(), Some("2026-12-31"));
        assert_eq!(grants[1].deadline.as_deref(), Some("2026-12-31"));
        assert_eq!(grants[0].url.as_deref(), Some("https://gov.example/calls"));
    }

    #[test]
    fn crawl_patterns_cap_at_ten() {
        let html: String = (0..15)
            .map(|i| format!("<h2>Grant number {i}</h2><p>Description {i}</p>"))
            .collect();
        assert_eq!(CrawlPatterns::default().grants(&html, "https://a.example").len(), 10);
    }

    #[test]
    fn title_falls_back_to_h1_then_placeholder() {
        let crawl = CrawlPatterns::default();
        assert_eq!(crawl.title(GRANTS_PAGE), "Open Calls");
        assert_eq!(crawl.title("<h1>Calls &amp; Grants</h1>"), "Calls & Grants");
        assert_eq!(crawl.title("<p>nothing</p>"), "Untitled Page");
        assert_eq!(HeadingPatterns::default().title(""), "Page");
    }

    #[test]
    fn links_are_resolved_and_filtered() {
        let html = r##"
            <a href="/grants/1">one</a>
            <a href="grants/2">two</a>
            <a href="#top">anchor</a>
            <a href="javascript:void(0)">js</a>
            <a href="https://other.example/grants">external</a>
            <a href="/files/call.pdf">pdf</a>
            <a href="/account/logout">logout</a>
            <a href="/grants/1">dup</a>
        "##;
        let page = Url::parse("https://gov.example/calls/").unwrap();
        let links = CrawlPatterns::default().links(html, &page, "gov.example");

        assert_eq!(
            links,
            vec![
                "https://gov.example/grants/1".to_string(),
                "https://gov.example/calls/grants/2".to_string(),
            ]
        );
    }

    #[test]
    fn links_cap_at_twenty() {
        let html: String = (0..30).map(|i| format!(r#"<a href="/p/{i}">x</a>"#)).collect();
        let page = Url::parse("https://gov.example/").unwrap();
        assert_eq!(CrawlPatterns::default().links(&html, &page, "gov.example").len(), 20);
    }

    #[test]
    fn heading_patterns_read_following_markup() {
        let html = r#"
            <script><h2>Not a grant heading</h2></script>
            <h2>Rural Development Fund</h2>
            <div>Budget € 40.000, closes 2026-06-30</div>
            <p>Support for rural cooperatives and farms.</p>
            <h3>Tiny</h3><p>Too short a title to count.</p>
            <h3>Heading Only Grant Title</h3>
        "#;
        let grants = HeadingPatterns::default().grants(html, "https://gov.example");

        assert_eq!(grants.len(), 2);
        assert_eq!(grants[0].title, "Rural Development Fund");
        assert_eq!(grants[0].description, "Support for rural cooperatives and farms.");
        assert_eq!(grants[0].amount, Some(40_000.0));
        assert_eq!(grants[0].deadline.as_deref(), Some("2026-06-30"));
        assert_eq!(grants[1].description, "Heading Only Grant Title");
        assert!(grants[1].url.is_none());
    }

    #[test]
    fn dates_normalise_or_keep_raw() {
        assert_eq!(normalize_date("2026-12-31"), "2026-12-31");
        assert_eq!(normalize_date("5/1/2027"), "2027-01-05");
        assert_eq!(normalize_date("15-03-2026"), "2026-03-15");
        assert_eq!(normalize_date("45/13/2026"), "45/13/2026");
    }

    #[test]
    fn text_content_strips_markup() {
        assert_eq!(
            text_content("<p>Grants &amp; <b>loans</b>\n\n for   all</p>"),
            "Grants & loans for all"
        );
    }
}
