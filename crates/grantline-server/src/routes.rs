use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use grantline_core::AppError;
use grantline_core::crawler::parse_http_url;
use grantline_core::job::JobStatus;
use grantline_core::job_queue::JobQueue;

use crate::auth::require_api_key;
use crate::dto::{
    CreateSourceRequest, EnqueueResponse, ErrorResponse, HealthResponse, JobListResponse,
    JobResponse, ListJobsQuery, LogListResponse, LogResponse, LogsQuery, RunAllResponse,
    RunSourceResponse, ScrapeRequest, ScrapeResponse, SourceResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const DEFAULT_JOB_LIMIT: usize = 20;
const MAX_JOB_LIMIT: usize = 100;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/scrape", post(scrape))
        .route("/v1/sources", post(create_source))
        .route("/v1/sources/run", post(run_all_sources))
        .route("/v1/sources/{id}/run", post(run_source))
        .route("/v1/sources/{id}/enqueue", post(enqueue_source))
        .route("/v1/sources/{id}/logs", get(source_logs))
        .route("/v1/jobs", get(list_jobs))
        .route("/v1/jobs/{id}", get(get_job))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .with_state(state)
}

fn not_found(message: String) -> axum::response::Response {
    let body = ErrorResponse {
        error: "not_found".to_string(),
        message,
    };
    (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/scrape",
    request_body = ScrapeRequest,
    responses(
        (status = 200, description = "Escalation outcome; scrape failures are reported in the body", body = ScrapeResponse),
        (status = 400, description = "Invalid URL", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "scrape"
)]
pub async fn scrape(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ScrapeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.pipeline.scrape_url(&body.url).await?;
    Ok(axum::Json(ScrapeResponse::from(outcome)))
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/sources",
    request_body = CreateSourceRequest,
    responses(
        (status = 201, description = "Source registered", body = SourceResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn create_source(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<CreateSourceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    parse_http_url(&body.url)?;
    let source = body.into_new_source().map_err(AppError::ParseError)?;
    let created = state.db.sources().create(&source).await?;

    Ok((StatusCode::CREATED, axum::Json(SourceResponse::from(created))))
}

#[utoipa::path(
    post,
    path = "/v1/sources/run",
    responses(
        (status = 200, description = "Per-source results", body = RunAllResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn run_all_sources(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.pipeline.run_all_active_sources().await?;
    Ok(axum::Json(RunAllResponse::from(summary)))
}

#[utoipa::path(
    post,
    path = "/v1/sources/{id}/run",
    params(
        ("id" = Uuid, Path, description = "Source ID")
    ),
    responses(
        (status = 200, description = "Run result", body = RunSourceResponse),
        (status = 404, description = "Unknown source", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn run_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.pipeline.run_source_by_id(id).await?;
    Ok(axum::Json(RunSourceResponse::from(result)))
}

#[utoipa::path(
    post,
    path = "/v1/sources/{id}/enqueue",
    params(
        ("id" = Uuid, Path, description = "Source ID")
    ),
    responses(
        (status = 202, description = "Job queued", body = EnqueueResponse),
        (status = 404, description = "Unknown source", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn enqueue_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.enqueuer.enqueue_source_by_id(id).await?;

    let response = EnqueueResponse {
        job_id: job.id,
        status: job.status.to_string(),
    };
    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

#[utoipa::path(
    get,
    path = "/v1/sources/{id}/logs",
    params(
        ("id" = Uuid, Path, description = "Source ID"),
        LogsQuery,
    ),
    responses(
        (status = 200, description = "Scrape logs, newest first", body = LogListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn source_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = state.pipeline.get_logs_for_source(id, query.limit).await?;
    let total = logs.len();

    let response = LogListResponse {
        logs: logs.into_iter().map(LogResponse::from).collect(),
        total,
    };
    Ok(axum::Json(response))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "List of jobs, newest first", body = JobListResponse),
        (status = 400, description = "Unknown status", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status_filter = query
        .status
        .map(|s| s.parse::<JobStatus>().map_err(AppError::ParseError))
        .transpose()?;

    let limit = query.limit.unwrap_or(DEFAULT_JOB_LIMIT).clamp(1, MAX_JOB_LIMIT);
    let jobs = state.db.job_repo().list(status_filter, limit).await?;
    let total = jobs.len();

    let response = JobListResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.db.job_repo().get(&id).await? {
        Some(job) => Ok(axum::Json(JobResponse::from(job)).into_response()),
        None => Ok(not_found(format!("Job not found: {id}"))),
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            axum::Json(HealthResponse {
                status: "healthy",
                database: "ok",
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(HealthResponse {
                    status: "unhealthy",
                    database: "error",
                }),
            )
        }
    }
}
