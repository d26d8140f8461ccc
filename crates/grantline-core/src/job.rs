use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Source, SourceType};

/// Status of a scrape job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Retry configuration with exponential backoff.
///
/// Delay schedule with the defaults: 5s, 10s, 20s, ... capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: TimeDelta,
    pub max_delay: TimeDelta,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: TimeDelta::seconds(5),
            max_delay: TimeDelta::minutes(10),
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after the given (1-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> TimeDelta {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay * 2_i32.pow(exponent);
        std::cmp::min(delay, self.max_delay)
    }
}

/// Age and count bounds for jobs in one terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionRule {
    pub max_age: TimeDelta,
    pub max_count: usize,
}

/// Bounded retention of terminal jobs.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub completed: RetentionRule,
    pub failed: RetentionRule,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed: RetentionRule {
                max_age: TimeDelta::days(1),
                max_count: 1000,
            },
            failed: RetentionRule {
                max_age: TimeDelta::days(7),
                max_count: 5000,
            },
        }
    }
}

impl RetentionPolicy {
    pub fn rule_for(&self, status: JobStatus) -> Option<&RetentionRule> {
        match status {
            JobStatus::Completed => Some(&self.completed),
            JobStatus::Failed => Some(&self.failed),
            JobStatus::Queued | JobStatus::Running => None,
        }
    }
}

/// Result recorded on a job once its source has been run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub source_id: Uuid,
    pub source_name: String,
    pub grants_found: usize,
    pub grants_saved: usize,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A "scrape this source" job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    /// `scrape-{source_id}-{unix millis}`.
    pub id: String,
    pub source_id: Uuid,
    pub source_name: String,
    pub source_url: String,
    pub source_type: SourceType,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub result: Option<JobResult>,
    pub worker_id: Option<String>,
}

impl ScrapeJob {
    pub fn make_id(source_id: Uuid, at: DateTime<Utc>) -> String {
        format!("scrape-{}-{}", source_id, at.timestamp_millis())
    }

    /// Builds a queued job. `attempts` counts claims, so it starts at zero.
    pub fn queued(request: &NewScrapeJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::make_id(request.source_id, now),
            source_id: request.source_id,
            source_name: request.source_name.clone(),
            source_url: request.source_url.clone(),
            source_type: request.source_type,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: request.max_attempts.unwrap_or(RetryConfig::default().max_attempts),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            next_run_at: now,
            error_message: None,
            result: None,
            worker_id: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn calculate_next_run(&self, config: &RetryConfig) -> DateTime<Utc> {
        Utc::now() + config.delay_for_attempt(self.attempts)
    }
}

/// Request to enqueue a job for one source.
#[derive(Debug, Clone)]
pub struct NewScrapeJob {
    pub source_id: Uuid,
    pub source_name: String,
    pub source_url: String,
    pub source_type: SourceType,
    pub max_attempts: Option<u32>,
}

impl NewScrapeJob {
    pub fn from_source(source: &Source) -> Self {
        Self {
            source_id: source.id,
            source_name: source.name.clone(),
            source_url: source.url.clone(),
            source_type: source.source_type,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }
}

/// Error recorded on a job whose worker stopped reporting back.
pub const STALLED_JOB_ERROR: &str = "Job stalled: worker stopped before finishing";

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub retry_config: RetryConfig,
    pub retention: RetentionPolicy,
    /// A `running` job older than this is treated as abandoned by its worker.
    pub stall_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(5),
            retry_config: RetryConfig::default(),
            retention: RetentionPolicy::default(),
            stall_timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry_config = retry;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("pending".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_backoff_doubles_from_five_seconds() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), TimeDelta::seconds(5));
        assert_eq!(config.delay_for_attempt(2), TimeDelta::seconds(10));
        assert_eq!(config.delay_for_attempt(3), TimeDelta::seconds(20));
        assert_eq!(config.delay_for_attempt(30), TimeDelta::minutes(10));
    }

    #[test]
    fn test_job_id_embeds_source_and_timestamp() {
        let source_id = Uuid::new_v4();
        let at = DateTime::from_timestamp_millis(1_767_225_600_000).unwrap();
        assert_eq!(
            ScrapeJob::make_id(source_id, at),
            format!("scrape-{source_id}-1767225600000")
        );
    }

    #[test]
    fn test_queued_job_defaults() {
        let request = NewScrapeJob {
            source_id: Uuid::new_v4(),
            source_name: "Ministry".into(),
            source_url: "https://gov.example".into(),
            source_type: SourceType::Html,
            max_attempts: None,
        };
        let now = Utc::now();
        let job = ScrapeJob::queued(&request, now);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.next_run_at, now);

        let custom = ScrapeJob::queued(&request.with_max_attempts(5), now);
        assert_eq!(custom.max_attempts, 5);
    }

    #[test]
    fn test_default_retention_bounds() {
        let policy = RetentionPolicy::default();
        let completed = policy.rule_for(JobStatus::Completed).unwrap();
        assert_eq!(completed.max_age, TimeDelta::days(1));
        assert_eq!(completed.max_count, 1000);
        let failed = policy.rule_for(JobStatus::Failed).unwrap();
        assert_eq!(failed.max_age, TimeDelta::days(7));
        assert_eq!(failed.max_count, 5000);
        assert!(policy.rule_for(JobStatus::Running).is_none());
    }
}
