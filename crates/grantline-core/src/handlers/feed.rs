use std::time::Duration;

use quick_xml::de::from_str;
use serde::Deserialize;

use super::SourceHandler;
use crate::error::AppError;
use crate::extraction::text_content;
use crate::models::{ScrapeMethod, ScrapeOutcome, ScrapedGrant, Source, SourceType};
use crate::traits::{FetchRequest, Fetcher, fetch_bounded};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded", alias = "encoded")]
    content_encoded: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Atom {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

/// An entry common to both feed formats.
#[derive(Debug, Default)]
struct FeedEntry {
    title: Option<String>,
    link: Option<String>,
    content: Option<String>,
}

/// Parses RSS 2.0 and Atom feeds.
#[derive(Clone)]
pub struct FeedHandler<F: Fetcher> {
    fetcher: F,
    timeout: Duration,
}

impl<F: Fetcher> FeedHandler<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            timeout: Duration::from_secs(30),
        }
    }

    async fn fetch_grants(&self, source: &Source) -> Result<Vec<ScrapedGrant>, AppError> {
        let request = FetchRequest::get(&source.url, self.timeout);
        let body = fetch_bounded(&self.fetcher, &request).await?;
        let entries = parse_feed(&String::from_utf8_lossy(&body))?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| map_entry(entry, source))
            .collect())
    }
}

impl<F: Fetcher> SourceHandler for FeedHandler<F> {
    fn can_handle(&self, source: &Source) -> bool {
        source.source_type == SourceType::Feed
    }

    async fn scrape(&self, source: &Source) -> ScrapeOutcome {
        match self.fetch_grants(source).await {
            Ok(grants) => {
                tracing::info!(source_id = %source.id, grants = grants.len(), "Feed scraped");
                ScrapeOutcome::success(grants, ScrapeMethod::Feed)
            }
            Err(e) => {
                tracing::warn!(source_id = %source.id, url = %source.url, error = %e, "Feed handler failed");
                ScrapeOutcome::failure(ScrapeMethod::Feed, e.to_string())
            }
        }
    }
}

fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, AppError> {
    let xml = scrub_html_entities(xml);

    if xml.contains("<rss") || xml.contains("<channel") {
        let rss: Rss = from_str(&xml).map_err(|e| AppError::ParseError(format!("RSS: {e}")))?;
        return Ok(rss
            .channel
            .items
            .into_iter()
            .map(|item| FeedEntry {
                title: item.title,
                link: item.link,
                content: item.content_encoded.or(item.description),
            })
            .collect());
    }

    if xml.contains("<feed") {
        let atom: Atom = from_str(&xml).map_err(|e| AppError::ParseError(format!("Atom: {e}")))?;
        return Ok(atom
            .entries
            .into_iter()
            .map(|entry| FeedEntry {
                title: entry.title.map(|t| t.value),
                link: entry
                    .links
                    .iter()
                    .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
                    .or(entry.links.first())
                    .and_then(|l| l.href.clone()),
                content: entry.content.or(entry.summary).map(|c| c.value),
            })
            .collect());
    }

    Err(AppError::ParseError("Unrecognised feed format".to_string()))
}

fn map_entry(entry: FeedEntry, source: &Source) -> Option<ScrapedGrant> {
    let title = entry.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;

    let raw = entry.content.unwrap_or_default();
    let snippet = text_content(&raw);
    let description = if snippet.is_empty() {
        raw.trim().to_string()
    } else {
        snippet
    };
    if description.is_empty() {
        return None;
    }

    let mut grant = ScrapedGrant::new(title, description);
    grant.url = Some(
        entry
            .link
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| source.url.clone()),
    );
    Some(grant)
}

const XML_ENTITIES: [&str; 5] = ["amp", "lt", "gt", "quot", "apos"];

/// HTML named entities are not valid XML. Outside CDATA sections, rewrite
/// every named entity except the five XML ones as numeric references and
/// escape any `&` that does not start a well-formed reference.
fn scrub_html_entities(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;

    while let Some(pos) = rest.find(['&', '<']) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if rest.starts_with("<![CDATA[") {
            let end = rest.find("]]>").map_or(rest.len(), |i| i + 3);
            out.push_str(&rest[..end]);
            rest = &rest[end..];
        } else if rest.starts_with('<') {
            out.push('<');
            rest = &rest[1..];
        } else {
            let consumed = push_reference(&mut out, rest);
            rest = &rest[consumed..];
        }
    }

    out.push_str(rest);
    out
}

/// Writes the XML-safe form of the reference at the start of `input`
/// (which begins with `&`) and returns how many bytes it covered.
fn push_reference(out: &mut String, input: &str) -> usize {
    let body = &input[1..];
    let name_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '#'))
        .unwrap_or(body.len());
    let name = &body[..name_len];

    if name.is_empty() || !body[name_len..].starts_with(';') {
        out.push_str("&amp;");
        return 1;
    }

    let token = &input[..name_len + 2];
    if name.starts_with('#') || XML_ENTITIES.contains(&name) {
        out.push_str(token);
        return token.len();
    }

    let decoded = html_escape::decode_html_entities(token);
    if decoded == token {
        out.push_str("&amp;");
        out.push_str(&token[1..]);
    } else {
        for c in decoded.chars() {
            out.push_str(&format!("&#{};", u32::from(c)));
        }
    }
    token.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockFetcher, make_source};

    const URL: &str = "https://feed.example/rss";

    const RSS: &str = r#"<?xml version="1.0"?>
        <rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
          <channel>
            <title>Grants</title>
            <item>
              <title>Youth Employment Call</title>
              <link>https://feed.example/youth</link>
              <description><![CDATA[<p>Hiring incentives&nbsp;for <b>young</b> workers</p>]]></description>
            </item>
            <item>
              <title>Heritage Fund</title>
              <description>Restoration of historic buildings</description>
            </item>
            <item>
              <title>   </title>
              <description>Missing title</description>
            </item>
            <item>
              <title>No body</title>
            </item>
          </channel>
        </rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
        <feed xmlns="http://www.w3.org/2005/Atom">
          <title>Calls</title>
          <entry>
            <title type="text">Digital Skills Grant</title>
            <link rel="alternate" href="https://feed.example/digital"/>
            <summary>Training for &lt;b&gt;SMEs&lt;/b&gt;</summary>
          </entry>
        </feed>"#;

    #[tokio::test]
    async fn maps_rss_items() {
        let fetcher = MockFetcher::new().with_page(URL, RSS);
        let outcome = FeedHandler::new(fetcher).scrape(&make_source(SourceType::Feed, URL)).await;

        assert_eq!(outcome.method, ScrapeMethod::Feed);
        assert_eq!(outcome.grants.len(), 2);
        assert_eq!(outcome.grants[0].title, "Youth Employment Call");
        assert_eq!(outcome.grants[0].description, "Hiring incentives for young workers");
        assert_eq!(outcome.grants[0].url.as_deref(), Some("https://feed.example/youth"));
        assert_eq!(outcome.grants[1].url.as_deref(), Some(URL));
    }

    #[tokio::test]
    async fn maps_atom_entries() {
        let fetcher = MockFetcher::new().with_page(URL, ATOM);
        let outcome = FeedHandler::new(fetcher).scrape(&make_source(SourceType::Feed, URL)).await;

        assert_eq!(outcome.grants.len(), 1);
        assert_eq!(outcome.grants[0].title, "Digital Skills Grant");
        assert_eq!(outcome.grants[0].description, "Training for SMEs");
        assert_eq!(outcome.grants[0].url.as_deref(), Some("https://feed.example/digital"));
    }

    #[tokio::test]
    async fn html_entities_in_rss_are_decoded() {
        let feed = r#"<?xml version="1.0"?>
            <rss version="2.0">
              <channel>
                <item>
                  <title>Convocatoria de innovaci&oacute;n</title>
                  <description>Ayudas para la peque&ntilde;a empresa</description>
                </item>
                <item>
                  <title>Formaci&oacute;n &amp; empleo &mdash; 2026</title>
                  <description>Plazo &laquo;abierto&raquo; R&D &bogus; fin</description>
                </item>
              </channel>
            </rss>"#;
        let fetcher = MockFetcher::new().with_page(URL, feed);
        let outcome = FeedHandler::new(fetcher).scrape(&make_source(SourceType::Feed, URL)).await;

        assert!(outcome.error.is_none(), "{:?}", outcome.error);
        assert_eq!(outcome.grants.len(), 2);
        assert_eq!(outcome.grants[0].title, "Convocatoria de innovación");
        assert_eq!(outcome.grants[0].description, "Ayudas para la pequeña empresa");
        assert_eq!(outcome.grants[1].title, "Formación & empleo \u{2014} 2026");
        assert!(outcome.grants[1].description.starts_with("Plazo «abierto» R&D"));
    }

    #[test]
    fn scrub_leaves_cdata_and_xml_entities_alone() {
        let xml = "<t>&lt;a&gt; &#233; &eacute;</t><d><![CDATA[&eacute; & more]]></d> & x";
        assert_eq!(
            scrub_html_entities(xml),
            "<t>&lt;a&gt; &#233; &#233;</t><d><![CDATA[&eacute; & more]]></d> &amp; x"
        );
        assert_eq!(scrub_html_entities("&nosuchentity;"), "&amp;nosuchentity;");
    }

    #[tokio::test]
    async fn unparseable_feed_is_reported() {
        let fetcher = MockFetcher::new().with_page(URL, "{\"not\": \"xml\"}");
        let outcome = FeedHandler::new(fetcher).scrape(&make_source(SourceType::Feed, URL)).await;

        assert_eq!(outcome.method, ScrapeMethod::Feed);
        assert!(outcome.grants.is_empty());
        assert!(outcome.error.is_some());
    }
}
