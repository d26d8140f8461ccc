use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use grantline_core::job::{JobResult, ScrapeJob};
use grantline_core::models::{
    EscalationOutcome, NewSource, Page, RunAllSummary, ScrapeLog, ScrapePersistResult, ScrapedGrant,
    Source, SourceType,
};

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ScrapeRequest {
    /// Absolute http(s) URL to crawl
    pub url: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrantResponse {
    pub title: String,
    pub description: String,
    pub amount: Option<f64>,
    pub deadline: Option<String>,
    pub url: Option<String>,
}

impl From<ScrapedGrant> for GrantResponse {
    fn from(g: ScrapedGrant) -> Self {
        Self {
            title: g.title,
            description: g.description,
            amount: g.amount,
            deadline: g.deadline,
            url: g.url,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    pub url: String,
    pub title: String,
    pub depth: usize,
    pub grants: Vec<GrantResponse>,
    pub links: Vec<String>,
}

impl From<Page> for PageResponse {
    fn from(p: Page) -> Self {
        Self {
            url: p.url,
            title: p.title,
            depth: p.depth,
            grants: p.grants.into_iter().map(GrantResponse::from).collect(),
            links: p.links,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub success: bool,
    pub pages: Vec<PageResponse>,
    /// `smart`, `generic` or `error`
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub grant_count: usize,
}

impl From<EscalationOutcome> for ScrapeResponse {
    fn from(o: EscalationOutcome) -> Self {
        Self {
            success: o.success,
            pages: o.pages.into_iter().map(PageResponse::from).collect(),
            method: o.method.to_string(),
            error: o.error,
            grant_count: o.grant_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateSourceRequest {
    pub name: String,
    pub url: String,
    /// `html`, `api`, `feed` (or `rss`), `document` (or `pdf`)
    #[serde(rename = "type")]
    pub source_type: String,
    pub region: String,
    pub active: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

impl CreateSourceRequest {
    pub fn into_new_source(self) -> Result<NewSource, String> {
        let source_type: SourceType = self.source_type.parse()?;
        Ok(NewSource {
            name: self.name,
            url: self.url,
            source_type,
            region: self.region,
            active: self.active.unwrap_or(true),
            metadata: self.metadata.unwrap_or_else(|| serde_json::json!({})),
        })
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub region: String,
    pub active: bool,
    pub metadata: serde_json::Value,
    pub last_run: Option<DateTime<Utc>>,
}

impl From<Source> for SourceResponse {
    fn from(s: Source) -> Self {
        Self {
            id: s.id,
            name: s.name,
            url: s.url,
            source_type: s.source_type.to_string(),
            region: s.region,
            active: s.active,
            metadata: s.metadata,
            last_run: s.last_run,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunSourceResponse {
    pub source_id: Uuid,
    pub source_name: String,
    pub method: String,
    pub success: bool,
    pub saved: usize,
    pub grant_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ScrapePersistResult> for RunSourceResponse {
    fn from(r: ScrapePersistResult) -> Self {
        Self {
            source_id: r.source_id,
            source_name: r.source_name,
            method: r.method.to_string(),
            success: r.success,
            saved: r.saved,
            grant_count: r.grant_count,
            error: r.error,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunAllResponse {
    pub sources_processed: usize,
    pub total_saved: usize,
    pub details: Vec<RunSourceResponse>,
}

impl From<RunAllSummary> for RunAllResponse {
    fn from(s: RunAllSummary) -> Self {
        Self {
            sources_processed: s.sources_processed,
            total_saved: s.total_saved,
            details: s.details.into_iter().map(RunSourceResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: String,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct LogsQuery {
    /// Defaults to 10 (also for 0), capped at 50
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogResponse {
    pub id: Uuid,
    pub source_id: Uuid,
    pub status: String,
    pub method: String,
    pub grant_count: usize,
    pub saved_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<ScrapeLog> for LogResponse {
    fn from(l: ScrapeLog) -> Self {
        Self {
            id: l.id,
            source_id: l.source_id,
            status: l.status.as_str().to_string(),
            method: l.result.method.to_string(),
            grant_count: l.result.grant_count,
            saved_count: l.result.saved_count,
            error: l.result.error,
            timestamp: l.timestamp,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LogListResponse {
    pub logs: Vec<LogResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResultResponse {
    pub grants_found: usize,
    pub grants_saved: usize,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobResult> for JobResultResponse {
    fn from(r: JobResult) -> Self {
        Self {
            grants_found: r.grants_found,
            grants_saved: r.grants_saved,
            duration_ms: r.duration_ms,
            success: r.success,
            error: r.error,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: String,
    pub source_id: Uuid,
    pub source_name: String,
    pub source_url: String,
    pub source_type: String,
    pub status: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub result: Option<JobResultResponse>,
    pub worker_id: Option<String>,
}

impl From<ScrapeJob> for JobResponse {
    fn from(job: ScrapeJob) -> Self {
        Self {
            id: job.id,
            source_id: job.source_id,
            source_name: job.source_name,
            source_url: job.source_url,
            source_type: job.source_type.to_string(),
            status: job.status.to_string(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            next_run_at: job.next_run_at,
            error_message: job.error_message,
            result: job.result.map(JobResultResponse::from),
            worker_id: job.worker_id,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    /// `queued`, `running`, `completed` or `failed`
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
