use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use super::SourceHandler;
use crate::error::AppError;
use crate::models::{ScrapeMethod, ScrapeOutcome, ScrapedGrant, Source, SourceType};
use crate::traits::{FetchRequest, Fetcher, fetch_bounded};

const TITLE_KEYS: [&str; 3] = ["title", "name", "grantTitle"];
const DESCRIPTION_KEYS: [&str; 3] = ["description", "summary", "details"];
const AMOUNT_KEYS: [&str; 3] = ["amount", "budget", "value"];
const DEADLINE_KEYS: [&str; 3] = ["deadline", "dueDate", "closeDate"];
const URL_KEYS: [&str; 3] = ["url", "link", "href"];

/// `metadata.api` of an API source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSettings {
    pub endpoint: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Dot-separated path to the item array, e.g. `payload.grants`.
    pub data_path: Option<String>,
    #[serde(default)]
    pub mapping: FieldMapping,
}

/// Explicit item keys (dot paths) per grant field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldMapping {
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount: Option<String>,
    pub deadline: Option<String>,
    pub url: Option<String>,
}

impl ApiSettings {
    pub fn from_metadata(metadata: &Value) -> Result<Self, AppError> {
        match metadata.get("api") {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(api) => serde_json::from_value(api.clone())
                .map_err(|e| AppError::ParseError(format!("Invalid api settings: {e}"))),
        }
    }
}

/// Maps JSON API responses to grants.
#[derive(Clone)]
pub struct ApiHandler<F: Fetcher> {
    fetcher: F,
    timeout: Duration,
}

impl<F: Fetcher> ApiHandler<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_grants(&self, source: &Source) -> Result<Vec<ScrapedGrant>, AppError> {
        let settings = ApiSettings::from_metadata(&source.metadata)?;
        let endpoint = settings.endpoint.as_deref().unwrap_or(&source.url);

        let mut request = FetchRequest::get(endpoint, self.timeout)
            .with_method(settings.method.as_deref().unwrap_or("GET").to_uppercase());
        for (name, value) in &settings.headers {
            request = request.with_header(name, value);
        }

        let body = fetch_bounded(&self.fetcher, &request).await?;
        let payload: Value = serde_json::from_slice(&body)
            .map_err(|e| AppError::ParseError(format!("Invalid JSON from {endpoint}: {e}")))?;

        let grants = resolve_items(&payload, settings.data_path.as_deref())
            .iter()
            .filter_map(|item| map_item(item, &settings.mapping, source))
            .collect();
        Ok(grants)
    }
}

impl<F: Fetcher> SourceHandler for ApiHandler<F> {
    fn can_handle(&self, source: &Source) -> bool {
        source.source_type == SourceType::Api
    }

    async fn scrape(&self, source: &Source) -> ScrapeOutcome {
        match self.fetch_grants(source).await {
            Ok(grants) => {
                tracing::info!(source_id = %source.id, grants = grants.len(), "API source scraped");
                ScrapeOutcome::success(grants, ScrapeMethod::Api)
            }
            Err(e) => {
                tracing::warn!(source_id = %source.id, error = %e, "API handler failed");
                ScrapeOutcome::failure(ScrapeMethod::Api, e.to_string())
            }
        }
    }
}

/// Item array: explicit `data_path`, then the payload itself, then
/// `data`, `results` or `items`.
fn resolve_items<'a>(payload: &'a Value, data_path: Option<&str>) -> &'a [Value] {
    if let Some(Value::Array(items)) = data_path.and_then(|path| get_by_path(payload, path)) {
        return items;
    }
    if let Value::Array(items) = payload {
        return items;
    }
    ["data", "results", "items"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn get_by_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|p| !p.is_empty())
        .try_fold(value, |current, part| current.as_object()?.get(part))
}

fn pick<'a>(item: &'a Value, mapped: Option<&str>, aliases: &[&str]) -> Option<&'a Value> {
    mapped
        .and_then(|path| get_by_path(item, path))
        .filter(|v| !v.is_null())
        .or_else(|| {
            aliases
                .iter()
                .find_map(|key| item.get(*key).filter(|v| !v.is_null()))
        })
}

fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Numeric amount tolerant of thousands separators.
fn parse_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s
            .chars()
            .filter(|c| !matches!(c, ',' | '.') && !c.is_whitespace())
            .collect::<String>()
            .parse::<f64>()
            .ok()?,
        _ => return None,
    };
    amount.is_finite().then_some(amount)
}

fn map_item(item: &Value, mapping: &FieldMapping, source: &Source) -> Option<ScrapedGrant> {
    if !item.is_object() {
        return None;
    }

    let title = pick(item, mapping.title.as_deref(), &TITLE_KEYS).and_then(as_text)?;
    let description =
        pick(item, mapping.description.as_deref(), &DESCRIPTION_KEYS).and_then(as_text)?;

    let mut grant = ScrapedGrant::new(title, description);
    grant.amount = pick(item, mapping.amount.as_deref(), &AMOUNT_KEYS).and_then(parse_amount);
    grant.deadline = pick(item, mapping.deadline.as_deref(), &DEADLINE_KEYS).and_then(as_text);
    grant.url = Some(
        pick(item, mapping.url.as_deref(), &URL_KEYS)
            .and_then(as_text)
            .unwrap_or_else(|| source.url.clone()),
    );
    Some(grant)
}
