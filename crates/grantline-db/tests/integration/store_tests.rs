use chrono::{NaiveDate, Utc};
use grantline_core::models::{
    GrantStatus, LogStatus, NewScrapeLog, ScrapeLogResult, ScrapeMethod, ScrapedGrant, SourceType,
};
use grantline_core::traits::{GrantStore, ScrapeLogStore, SourceRegistry};

use crate::integration::common::{insert_source, setup_test_db};

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn registry_lists_active_sources_and_touches_last_run() {
    let (db, _container) = setup_test_db().await;
    let active = insert_source(&db, "Agency", SourceType::Feed).await;
    let dormant = insert_source(&db, "Dormant", SourceType::Html).await;
    sqlx::query("UPDATE sources SET active = FALSE WHERE id = $1")
        .bind(dormant.id)
        .execute(db.pool())
        .await
        .unwrap();

    let listed = db.list_active_sources().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, active.id);
    assert_eq!(listed[0].source_type, SourceType::Feed);

    let at = Utc::now();
    db.touch_last_run(active.id, at).await.unwrap();
    let reloaded = db.get_source(active.id).await.unwrap().unwrap();
    assert!(reloaded.last_run.is_some());

    assert!(db.get_source(uuid::Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn grants_are_normalised_and_deduplicated_per_source() {
    let (db, _container) = setup_test_db().await;
    let source = insert_source(&db, "Agency", SourceType::Html).await;
    let other = insert_source(&db, "Other", SourceType::Html).await;

    let grants = vec![
        ScrapedGrant {
            amount: Some(-5.0),
            deadline: Some("2026-12-31".into()),
            sectors: Some(vec![" energy ".into(), "".into()]),
            ..ScrapedGrant::new("Solar Retrofit Fund", "Panels for schools")
        },
        ScrapedGrant::new("  solar retrofit fund ", "Duplicate title"),
        ScrapedGrant::new("", "No title"),
    ];

    let saved = db.save_new_grants(&source, &grants).await.unwrap();
    assert_eq!(saved.len(), 1);
    let grant = &saved[0];
    assert_eq!(grant.amount, None);
    assert_eq!(grant.deadline, NaiveDate::from_ymd_opt(2026, 12, 31));
    assert_eq!(grant.region, "north");
    assert_eq!(grant.official_url, source.url);
    assert_eq!(grant.status, GrantStatus::Open);
    assert_eq!(grant.sectors, Some(vec!["energy".to_string()]));

    // Second run stores nothing new
    assert!(db.save_new_grants(&source, &grants).await.unwrap().is_empty());
    // Same title under another source is a different grant
    assert_eq!(db.save_new_grants(&other, &grants).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn logs_come_back_newest_first() {
    let (db, _container) = setup_test_db().await;
    let source = insert_source(&db, "Agency", SourceType::Api).await;

    for (i, status) in [LogStatus::Success, LogStatus::Error, LogStatus::Success].into_iter().enumerate() {
        db.append_log(&NewScrapeLog {
            source_id: source.id,
            status,
            result: ScrapeLogResult {
                method: ScrapeMethod::Api,
                grant_count: i,
                saved_count: i,
                error: None,
            },
            timestamp: Utc::now() + chrono::TimeDelta::seconds(i as i64),
        })
        .await
        .unwrap();
    }

    let logs = db.recent_logs(source.id, 2).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].result.grant_count, 2);
    assert_eq!(logs[1].status, LogStatus::Error);
}
