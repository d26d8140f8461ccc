use std::time::Duration;

use chrono::{TimeDelta, Utc};
use grantline_core::job::{
    JobResult, JobStatus, NewScrapeJob, RetentionPolicy, RetentionRule, STALLED_JOB_ERROR,
};
use grantline_core::job_queue::JobQueue;
use grantline_core::models::SourceType;
use grantline_core::testutil::make_source;

use crate::integration::common::setup_test_db;

fn request(name: &str) -> NewScrapeJob {
    let mut source = make_source(SourceType::Html, &format!("https://{name}.example"));
    source.name = name.to_string();
    NewScrapeJob::from_source(&source)
}

fn result_for(job_source: uuid::Uuid, success: bool) -> JobResult {
    JobResult {
        source_id: job_source,
        source_name: "Test source".into(),
        grants_found: 4,
        grants_saved: 2,
        duration_ms: 120,
        success,
        error: None,
    }
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn add_job_and_verify_fields() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    let job = repo.add(request("alpha")).await.unwrap();

    assert!(job.id.starts_with(&format!("scrape-{}-", job.source_id)));
    assert_eq!(job.source_name, "alpha");
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 3);
    assert!(job.worker_id.is_none());
    assert!(job.started_at.is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn add_bulk_inserts_every_request() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    let jobs = repo
        .add_bulk(vec![request("a"), request("b"), request("c").with_max_attempts(7)])
        .await
        .unwrap();

    assert_eq!(jobs.len(), 3);
    assert_eq!(repo.count_by_status(JobStatus::Queued).await.unwrap(), 3);
    assert!(jobs.iter().any(|j| j.max_attempts == 7));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn claim_increments_attempts_and_skips_running_jobs() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    repo.add(request("alpha")).await.unwrap();

    let claimed = repo.claim("worker-1").await.unwrap().expect("Should claim the job");
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.attempts, 1);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    assert!(claimed.started_at.is_some());

    assert!(repo.claim("worker-2").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn complete_stores_result() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    let job = repo.add(request("alpha")).await.unwrap();
    repo.claim("worker-1").await.unwrap();
    repo.complete(&job.id, &result_for(job.source_id, true)).await.unwrap();

    let updated = repo.get(&job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Completed);
    assert_eq!(updated.result, Some(result_for(job.source_id, true)));
    assert!(updated.completed_at.is_some());
    assert!(updated.worker_id.is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn fail_with_next_run_requeues_in_the_future() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    let job = repo.add(request("alpha")).await.unwrap();
    repo.claim("worker-1").await.unwrap();

    let next_run = Utc::now() + TimeDelta::minutes(5);
    repo.fail(&job.id, "temporary error", None, Some(next_run)).await.unwrap();

    let updated = repo.get(&job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Queued);
    assert_eq!(updated.attempts, 1);
    assert!(updated.next_run_at > Utc::now());
    assert_eq!(updated.error_message.as_deref(), Some("temporary error"));

    // Not due yet
    assert!(repo.claim("worker-1").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn fail_without_next_run_is_terminal() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    let job = repo.add(request("alpha")).await.unwrap();
    repo.claim("worker-1").await.unwrap();
    let result = result_for(job.source_id, false);
    repo.fail(&job.id, "permanent error", Some(&result), None).await.unwrap();

    let updated = repo.get(&job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Failed);
    assert!(updated.completed_at.is_some());
    assert_eq!(updated.result, Some(result));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn release_worker_jobs_on_shutdown() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    repo.add(request("a")).await.unwrap();
    repo.add(request("b")).await.unwrap();
    repo.claim("worker-1").await.unwrap();
    repo.claim("worker-1").await.unwrap();

    assert_eq!(repo.release_worker_jobs("worker-1").await.unwrap(), 2);
    assert_eq!(repo.count_by_status(JobStatus::Queued).await.unwrap(), 2);
}

async fn backdate_running_jobs(db: &grantline_db::Database) {
    sqlx::query("UPDATE scrape_jobs SET started_at = NOW() - interval '1 hour' WHERE status = 'running'")
        .execute(db.pool())
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn stalled_job_is_reclaimed_by_another_worker() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    let job = repo.add(request("alpha")).await.unwrap();
    repo.claim("worker-a").await.unwrap().expect("Should claim the job");

    // Within the lease the claim stands.
    assert_eq!(repo.recover_stalled(Duration::from_secs(600)).await.unwrap(), 0);
    assert!(repo.claim("worker-b").await.unwrap().is_none());

    backdate_running_jobs(&db).await;
    assert_eq!(repo.recover_stalled(Duration::from_secs(600)).await.unwrap(), 1);

    let reclaimed = repo.claim("worker-b").await.unwrap().expect("Should reclaim the job");
    assert_eq!(reclaimed.id, job.id);
    assert_eq!(reclaimed.attempts, 2);
    assert_eq!(reclaimed.worker_id.as_deref(), Some("worker-b"));
    assert_eq!(reclaimed.error_message.as_deref(), Some(STALLED_JOB_ERROR));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn stalled_job_on_last_attempt_is_failed() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    let job = repo.add(request("alpha").with_max_attempts(1)).await.unwrap();
    repo.claim("worker-a").await.unwrap().expect("Should claim the job");
    backdate_running_jobs(&db).await;

    assert_eq!(repo.recover_stalled(Duration::from_secs(600)).await.unwrap(), 1);

    let failed = repo.get(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.completed_at.is_some());
    assert!(failed.worker_id.is_none());
    assert!(repo.claim("worker-b").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn list_with_status_filter() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    repo.add(request("a")).await.unwrap();
    repo.add(request("b")).await.unwrap();
    repo.claim("worker-1").await.unwrap();

    assert_eq!(repo.list(Some(JobStatus::Queued), 10).await.unwrap().len(), 1);
    assert_eq!(repo.list(Some(JobStatus::Running), 10).await.unwrap().len(), 1);
    assert_eq!(repo.list(None, 10).await.unwrap().len(), 2);
    assert_eq!(repo.list(None, 1).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn prune_keeps_only_the_newest_finished_jobs() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    for name in ["a", "b", "c"] {
        let job = repo.add(request(name)).await.unwrap();
        repo.claim("worker-1").await.unwrap();
        repo.complete(&job.id, &result_for(job.source_id, true)).await.unwrap();
    }
    repo.add(request("queued")).await.unwrap();

    let policy = RetentionPolicy {
        completed: RetentionRule {
            max_age: TimeDelta::days(1),
            max_count: 1,
        },
        ..RetentionPolicy::default()
    };
    assert_eq!(repo.prune(&policy).await.unwrap(), 2);
    assert_eq!(repo.count_by_status(JobStatus::Completed).await.unwrap(), 1);
    assert_eq!(repo.count_by_status(JobStatus::Queued).await.unwrap(), 1);
}
