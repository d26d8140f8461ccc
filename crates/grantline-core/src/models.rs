use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared format of a source. Selects the handler that scrapes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Html,
    Api,
    #[serde(alias = "rss")]
    Feed,
    #[serde(alias = "pdf")]
    Document,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Html => "html",
            SourceType::Api => "api",
            SourceType::Feed => "feed",
            SourceType::Document => "document",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "html" => Ok(SourceType::Html),
            "api" => Ok(SourceType::Api),
            "feed" | "rss" => Ok(SourceType::Feed),
            "document" | "pdf" => Ok(SourceType::Document),
            _ => Err(format!("Unknown source type: {}", s)),
        }
    }
}

/// A configured origin to be scraped. Owned by the external source registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub region: String,
    pub active: bool,
    /// Free-form per-source settings (API mapping, AI extraction switch, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub last_run: Option<DateTime<Utc>>,
}

/// DTO for registering a source.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub region: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_active() -> bool {
    true
}

/// Publication status of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Open,
    Closed,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Open => "open",
            GrantStatus::Closed => "closed",
        }
    }
}

impl FromStr for GrantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(GrantStatus::Open),
            "closed" => Ok(GrantStatus::Closed),
            _ => Err(format!("Unknown grant status: {}", s)),
        }
    }
}

/// A grant candidate produced by one extraction call.
///
/// Only `title` and `description` are guaranteed; every other field depends
/// on what the extraction tier could find.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedGrant {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sectors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beneficiaries: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GrantStatus>,
}

impl ScrapedGrant {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// A grant may only be emitted with a non-empty title and description.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.description.trim().is_empty()
    }
}

/// Which extraction path actually produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeMethod {
    Smart,
    Generic,
    Api,
    Feed,
    Document,
    Error,
}

impl ScrapeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeMethod::Smart => "smart",
            ScrapeMethod::Generic => "generic",
            ScrapeMethod::Api => "api",
            ScrapeMethod::Feed => "feed",
            ScrapeMethod::Document => "document",
            ScrapeMethod::Error => "error",
        }
    }
}

impl fmt::Display for ScrapeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Uniform result of one handler invocation. Never an exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub grants: Vec<ScrapedGrant>,
    pub method: ScrapeMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrapeOutcome {
    pub fn success(grants: Vec<ScrapedGrant>, method: ScrapeMethod) -> Self {
        Self {
            grants,
            method,
            error: None,
        }
    }

    pub fn failure(method: ScrapeMethod, error: impl Into<String>) -> Self {
        Self {
            grants: Vec::new(),
            method,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.method != ScrapeMethod::Error
    }
}

/// One page retrieved by an extraction tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    pub title: String,
    /// Raw HTML as fetched. Empty for tiers that do not keep it.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub content: String,
    pub grants: Vec<ScrapedGrant>,
    #[serde(default)]
    pub links: Vec<String>,
    pub depth: usize,
}

/// Result of running the tier chain against a single URL.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationOutcome {
    pub success: bool,
    pub pages: Vec<Page>,
    pub method: ScrapeMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub grant_count: usize,
}

impl EscalationOutcome {
    pub fn exhausted() -> Self {
        Self {
            success: false,
            pages: Vec::new(),
            method: ScrapeMethod::Error,
            error: Some(crate::error::AppError::TiersExhausted.to_string()),
            grant_count: 0,
        }
    }

    /// Flattened grants across every page, in page order.
    pub fn grants(&self) -> Vec<ScrapedGrant> {
        self.pages
            .iter()
            .flat_map(|p| p.grants.iter().cloned())
            .collect()
    }
}

/// A grant as accepted by the grant store.
#[derive(Debug, Clone, Serialize)]
pub struct SavedGrant {
    pub id: Uuid,
    pub source_id: Uuid,
    pub title: String,
    pub description: String,
    pub amount: Option<f64>,
    pub deadline: Option<NaiveDate>,
    pub region: String,
    pub official_url: String,
    pub status: GrantStatus,
    pub sectors: Option<Vec<String>>,
    pub beneficiaries: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// A scraped grant normalised for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGrant {
    pub source_id: Uuid,
    pub title: String,
    pub description: String,
    pub amount: Option<f64>,
    pub deadline: Option<NaiveDate>,
    pub region: String,
    pub official_url: String,
    pub status: GrantStatus,
    pub sectors: Option<Vec<String>>,
    pub beneficiaries: Option<Vec<String>>,
}

impl NewGrant {
    /// Applies the storage defaults of `source` to a scraped grant.
    ///
    /// Returns `None` for grants without a title or description.
    pub fn prepare(source: &Source, grant: &ScrapedGrant) -> Option<Self> {
        if !grant.is_valid() {
            return None;
        }

        Some(Self {
            source_id: source.id,
            title: grant.title.trim().to_string(),
            description: grant.description.trim().to_string(),
            amount: grant.amount.filter(|a| a.is_finite() && *a > 0.0),
            deadline: grant
                .deadline
                .as_deref()
                .and_then(crate::extraction::parse_date),
            region: source.region.clone(),
            official_url: grant
                .url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .unwrap_or(&source.url)
                .to_string(),
            status: grant.status.unwrap_or(GrantStatus::Open),
            sectors: clean_list(grant.sectors.as_deref()),
            beneficiaries: clean_list(grant.beneficiaries.as_deref()),
        })
    }

    /// Key used to detect a grant already stored for the same source.
    pub fn dedup_key(&self) -> String {
        self.title.trim().to_lowercase()
    }
}

fn clean_list(values: Option<&[String]>) -> Option<Vec<String>> {
    let cleaned: Vec<String> = values?
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Audit status of a scrape log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
        }
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LogStatus::Success),
            "error" => Ok(LogStatus::Error),
            _ => Err(format!("Unknown log status: {}", s)),
        }
    }
}

/// Body of a scrape log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeLogResult {
    pub method: ScrapeMethod,
    pub grant_count: usize,
    pub saved_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Audit record appended after each source run. Read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeLog {
    pub id: Uuid,
    pub source_id: Uuid,
    pub status: LogStatus,
    pub result: ScrapeLogResult,
    pub timestamp: DateTime<Utc>,
}

/// DTO for appending a new scrape log.
#[derive(Debug, Clone)]
pub struct NewScrapeLog {
    pub source_id: Uuid,
    pub status: LogStatus,
    pub result: ScrapeLogResult,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of scraping and persisting one source.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapePersistResult {
    pub source_id: Uuid,
    pub source_name: String,
    pub method: ScrapeMethod,
    pub success: bool,
    pub saved: usize,
    pub grant_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate of a run over every active source.
#[derive(Debug, Clone, Serialize)]
pub struct RunAllSummary {
    pub sources_processed: usize,
    pub total_saved: usize,
    pub details: Vec<ScrapePersistResult>,
}
