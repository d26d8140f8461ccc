//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{
    JobResult, JobStatus, NewScrapeJob, RetentionPolicy, RetentionRule, STALLED_JOB_ERROR, ScrapeJob,
};
use crate::job_queue::JobQueue;
use crate::models::{
    NewGrant, NewScrapeLog, SavedGrant, ScrapeLog, ScrapePersistResult, ScrapedGrant, Source,
    SourceType,
};
use crate::traits::{
    Enricher, EnrichmentRequest, FetchRequest, Fetcher, GrantStore, Notifier, ScrapeLogStore,
    SourceRegistry, SourceRunner, TextExtractor,
};
use crate::worker::{WorkerEvent, WorkerReporter};

/// An active source named "Test source".
pub fn make_source(source_type: SourceType, url: &str) -> Source {
    Source {
        id: Uuid::new_v4(),
        name: "Test source".to_string(),
        url: url.to_string(),
        source_type,
        region: "test-region".to_string(),
        active: true,
        metadata: serde_json::Value::Null,
        last_run: None,
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher serving fixed bodies per URL.
///
/// Errors registered for a URL are returned (in order) before its body.
/// Unknown URLs fail with `HTTP 404`.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    errors: Arc<Mutex<HashMap<String, VecDeque<AppError>>>>,
    requests: Arc<Mutex<Vec<FetchRequest>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.with_bytes(url, body.as_bytes().to_vec())
    }

    pub fn with_bytes(self, url: &str, body: Vec<u8>) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), body);
        self
    }

    pub fn with_error(self, url: &str, error: AppError) -> Self {
        self.errors
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(error);
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }

    pub fn last_request(&self) -> Option<FetchRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, AppError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(err) = self
            .errors
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        self.pages
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .ok_or_else(|| AppError::HttpError("HTTP 404".to_string()))
    }
}

// ---------------------------------------------------------------------------
// MockEnricher
// ---------------------------------------------------------------------------

/// Mock enricher returning one configurable answer and recording requests.
#[derive(Clone)]
pub struct MockEnricher {
    grant: Arc<Mutex<Option<ScrapedGrant>>>,
    error: Arc<Mutex<Option<AppError>>>,
    requests: Arc<Mutex<Vec<EnrichmentRequest>>>,
}

impl MockEnricher {
    fn build(grant: Option<ScrapedGrant>, error: Option<AppError>) -> Self {
        Self {
            grant: Arc::new(Mutex::new(grant)),
            error: Arc::new(Mutex::new(error)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Service answers without a usable grant.
    pub fn none() -> Self {
        Self::build(None, None)
    }

    pub fn returning(grant: ScrapedGrant) -> Self {
        Self::build(Some(grant), None)
    }

    pub fn failing(error: AppError) -> Self {
        Self::build(None, Some(error))
    }

    pub fn requests(&self) -> Vec<EnrichmentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Enricher for MockEnricher {
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<Option<ScrapedGrant>, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(self.grant.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// MockTextExtractor
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum ExtractorMode {
    Passthrough,
    Failing(Arc<Mutex<Option<AppError>>>),
    Panicking,
}

/// Mock document text extractor.
#[derive(Clone)]
pub struct MockTextExtractor {
    mode: ExtractorMode,
}

impl MockTextExtractor {
    /// Decodes the bytes as UTF-8.
    pub fn passthrough() -> Self {
        Self {
            mode: ExtractorMode::Passthrough,
        }
    }

    pub fn failing(error: AppError) -> Self {
        Self {
            mode: ExtractorMode::Failing(Arc::new(Mutex::new(Some(error)))),
        }
    }

    pub fn panicking() -> Self {
        Self {
            mode: ExtractorMode::Panicking,
        }
    }
}

impl TextExtractor for MockTextExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, AppError> {
        match &self.mode {
            ExtractorMode::Passthrough => Ok(String::from_utf8_lossy(bytes).into_owned()),
            ExtractorMode::Failing(error) => Err(error
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| AppError::ParseError("extraction failed".into()))),
            ExtractorMode::Panicking => panic!("text extractor exploded"),
        }
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory source registry, grant store and scrape-log store.
#[derive(Clone, Default)]
pub struct MockStore {
    sources: Arc<Mutex<Vec<Source>>>,
    grants: Arc<Mutex<Vec<SavedGrant>>>,
    existing: Arc<Mutex<Vec<(Uuid, String)>>>,
    logs: Arc<Mutex<Vec<ScrapeLog>>>,
    last_runs: Arc<Mutex<HashMap<Uuid, DateTime<Utc>>>>,
    save_error: Arc<Mutex<Option<AppError>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(self, sources: Vec<Source>) -> Self {
        self.sources.lock().unwrap().extend(sources);
        self
    }

    /// Marks a title as already stored for `source_id`.
    pub fn with_existing_title(self, source_id: Uuid, title: &str) -> Self {
        self.existing
            .lock()
            .unwrap()
            .push((source_id, title.trim().to_lowercase()));
        self
    }

    pub fn with_save_error(self, error: AppError) -> Self {
        *self.save_error.lock().unwrap() = Some(error);
        self
    }

    pub fn saved_grants(&self) -> Vec<SavedGrant> {
        self.grants.lock().unwrap().clone()
    }

    /// Appended logs, oldest first.
    pub fn logs(&self) -> Vec<ScrapeLog> {
        self.logs.lock().unwrap().clone()
    }

    pub fn last_run(&self, source_id: Uuid) -> Option<DateTime<Utc>> {
        self.last_runs.lock().unwrap().get(&source_id).copied()
    }
}

impl SourceRegistry for MockStore {
    async fn get_source(&self, id: Uuid) -> Result<Option<Source>, AppError> {
        Ok(self
            .sources
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn list_active_sources(&self) -> Result<Vec<Source>, AppError> {
        Ok(self
            .sources
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn touch_last_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        self.last_runs.lock().unwrap().insert(id, at);
        Ok(())
    }
}

impl GrantStore for MockStore {
    async fn save_new_grants(
        &self,
        source: &Source,
        grants: &[ScrapedGrant],
    ) -> Result<Vec<SavedGrant>, AppError> {
        if let Some(e) = self.save_error.lock().unwrap().take() {
            return Err(e);
        }

        let mut existing = self.existing.lock().unwrap();
        let mut saved = Vec::new();
        for grant in grants.iter().filter_map(|g| NewGrant::prepare(source, g)) {
            let key = (source.id, grant.dedup_key());
            if existing.contains(&key) {
                continue;
            }
            existing.push(key);
            saved.push(SavedGrant {
                id: Uuid::new_v4(),
                source_id: grant.source_id,
                title: grant.title,
                description: grant.description,
                amount: grant.amount,
                deadline: grant.deadline,
                region: grant.region,
                official_url: grant.official_url,
                status: grant.status,
                sectors: grant.sectors,
                beneficiaries: grant.beneficiaries,
                created_at: Utc::now(),
            });
        }
        self.grants.lock().unwrap().extend(saved.iter().cloned());
        Ok(saved)
    }
}

impl ScrapeLogStore for MockStore {
    async fn append_log(&self, log: &NewScrapeLog) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        self.logs.lock().unwrap().push(ScrapeLog {
            id,
            source_id: log.source_id,
            status: log.status,
            result: log.result.clone(),
            timestamp: log.timestamp,
        });
        Ok(id)
    }

    async fn recent_logs(&self, source_id: Uuid, limit: usize) -> Result<Vec<ScrapeLog>, AppError> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|l| l.source_id == source_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

/// Records the number of grants per notification.
#[derive(Clone, Default)]
pub struct MockNotifier {
    notified: Arc<Mutex<Vec<usize>>>,
    fail: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn notified(&self) -> Vec<usize> {
        self.notified.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    async fn notify_new_grants(&self, _source: &Source, grants: &[SavedGrant]) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::Generic("mail server down".into()));
        }
        self.notified.lock().unwrap().push(grants.len());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockJobQueue
// ---------------------------------------------------------------------------

/// In-memory job queue with call recording.
#[derive(Clone, Default)]
pub struct MockJobQueue {
    jobs: Arc<Mutex<Vec<ScrapeJob>>>,
    bulk_calls: Arc<Mutex<Vec<usize>>>,
    prune_calls: Arc<Mutex<usize>>,
    released: Arc<Mutex<Vec<String>>>,
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<ScrapeJob> {
        self.jobs.lock().unwrap().clone()
    }

    /// Size of each `add_bulk` call.
    pub fn bulk_calls(&self) -> Vec<usize> {
        self.bulk_calls.lock().unwrap().clone()
    }

    pub fn prune_calls(&self) -> usize {
        *self.prune_calls.lock().unwrap()
    }

    pub fn released_workers(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    pub fn set_attempts(&self, job_id: &str, attempts: u32) {
        if let Some(job) = self.jobs.lock().unwrap().iter_mut().find(|j| j.id == job_id) {
            job.attempts = attempts;
        }
    }

    /// Moves a claimed job's start time into the past.
    pub fn backdate_start(&self, job_id: &str, by: TimeDelta) {
        if let Some(job) = self.jobs.lock().unwrap().iter_mut().find(|j| j.id == job_id) {
            job.started_at = job.started_at.map(|at| at - by);
        }
    }

    fn update(&self, job_id: &str, f: impl FnOnce(&mut ScrapeJob)) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| AppError::Generic(format!("job {job_id} not found")))?;
        f(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

impl JobQueue for MockJobQueue {
    async fn add(&self, request: NewScrapeJob) -> Result<ScrapeJob, AppError> {
        let job = ScrapeJob::queued(&request, Utc::now());
        self.jobs.lock().unwrap().push(job.clone());
        Ok(job)
    }

    async fn add_bulk(&self, requests: Vec<NewScrapeJob>) -> Result<Vec<ScrapeJob>, AppError> {
        self.bulk_calls.lock().unwrap().push(requests.len());
        let now = Utc::now();
        let jobs: Vec<ScrapeJob> = requests.iter().map(|r| ScrapeJob::queued(r, now)).collect();
        self.jobs.lock().unwrap().extend(jobs.iter().cloned());
        Ok(jobs)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<ScrapeJob>, AppError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let next = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Queued && j.next_run_at <= now)
            .min_by_key(|j| (j.next_run_at, j.created_at));
        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.attempts += 1;
            job.worker_id = Some(worker_id.to_string());
            job.started_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn complete(&self, job_id: &str, result: &JobResult) -> Result<(), AppError> {
        self.update(job_id, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result.clone());
            job.completed_at = Some(Utc::now());
            job.worker_id = None;
        })
    }

    async fn fail(
        &self,
        job_id: &str,
        error: &str,
        result: Option<&JobResult>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        self.update(job_id, |job| {
            job.error_message = Some(error.to_string());
            job.result = result.cloned();
            job.worker_id = None;
            match next_run_at {
                Some(at) => {
                    job.status = JobStatus::Queued;
                    job.next_run_at = at;
                }
                None => {
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(Utc::now());
                }
            }
        })
    }

    async fn get(&self, job_id: &str) -> Result<Option<ScrapeJob>, AppError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == job_id)
            .cloned())
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<ScrapeJob>, AppError> {
        let mut jobs: Vec<ScrapeJob> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, AppError> {
        self.released.lock().unwrap().push(worker_id.to_string());
        let mut count = 0;
        for job in self.jobs.lock().unwrap().iter_mut() {
            if job.status == JobStatus::Running && job.worker_id.as_deref() == Some(worker_id) {
                job.status = JobStatus::Queued;
                job.worker_id = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn recover_stalled(&self, lease: Duration) -> Result<u64, AppError> {
        let cutoff = Utc::now() - TimeDelta::from_std(lease).unwrap();
        let mut count = 0;
        for job in self.jobs.lock().unwrap().iter_mut() {
            if job.status != JobStatus::Running || job.started_at.is_none_or(|at| at >= cutoff) {
                continue;
            }
            job.error_message = Some(STALLED_JOB_ERROR.to_string());
            job.worker_id = None;
            if job.can_retry() {
                job.status = JobStatus::Queued;
                job.started_at = None;
                job.next_run_at = Utc::now();
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
            }
            count += 1;
        }
        Ok(count)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.status == status)
            .count() as i64)
    }

    async fn prune(&self, policy: &RetentionPolicy) -> Result<u64, AppError> {
        *self.prune_calls.lock().unwrap() += 1;
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let mut evicted: Vec<String> = Vec::new();
        for status in [JobStatus::Completed, JobStatus::Failed] {
            let Some(rule) = policy.rule_for(status) else {
                continue;
            };
            let finished: Vec<(String, DateTime<Utc>)> = jobs
                .iter()
                .filter(|j| j.status == status)
                .map(|j| (j.id.clone(), j.completed_at.unwrap_or(j.updated_at)))
                .collect();
            evicted.extend(retention_evictions(rule, &finished, now));
        }
        jobs.retain(|j| !evicted.contains(&j.id));
        Ok(evicted.len() as u64)
    }
}

/// Ids to evict from `finished` (id, finish time), oldest first. Mirrors the
/// SQL pruning: a job goes once it is older than `max_age` or falls outside
/// the newest `max_count` entries.
fn retention_evictions(
    rule: &RetentionRule,
    finished: &[(String, DateTime<Utc>)],
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut ordered: Vec<&(String, DateTime<Utc>)> = finished.iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1));

    let mut evicted: Vec<&(String, DateTime<Utc>)> = ordered
        .into_iter()
        .enumerate()
        .filter(|(rank, (_, at))| *rank >= rule.max_count || now - *at > rule.max_age)
        .map(|(_, entry)| entry)
        .collect();
    evicted.reverse();
    evicted.into_iter().map(|(id, _)| id.clone()).collect()
}

// ---------------------------------------------------------------------------
// MockRunner
// ---------------------------------------------------------------------------

/// Source runner returning queued responses, or panicking.
#[derive(Clone)]
pub struct MockRunner {
    responses: Arc<Mutex<VecDeque<Result<ScrapePersistResult, AppError>>>>,
    panic: bool,
}

impl MockRunner {
    pub fn new(responses: Vec<Result<ScrapePersistResult, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            panic: false,
        }
    }

    pub fn panicking() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            panic: true,
        }
    }
}

impl SourceRunner for MockRunner {
    async fn run_source(&self, source_id: Uuid) -> Result<ScrapePersistResult, AppError> {
        if self.panic {
            panic!("runner exploded");
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::SourceNotFound(source_id.to_string())))
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records worker event names.
#[derive(Default)]
pub struct MockReporter {
    events: Mutex<Vec<String>>,
}

impl MockReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let name = match event {
            WorkerEvent::Started { .. } => "started",
            WorkerEvent::Polling => "polling",
            WorkerEvent::JobClaimed { .. } => "job_claimed",
            WorkerEvent::JobStarted { .. } => "job_started",
            WorkerEvent::JobCompleted { .. } => "job_completed",
            WorkerEvent::JobFailed { .. } => "job_failed",
            WorkerEvent::JobsPruned { .. } => "jobs_pruned",
            WorkerEvent::JobsRecovered { .. } => "jobs_recovered",
            WorkerEvent::ShuttingDown { .. } => "shutting_down",
            WorkerEvent::Stopped { .. } => "stopped",
        };
        self.events.lock().unwrap().push(name.to_string());
    }
}
