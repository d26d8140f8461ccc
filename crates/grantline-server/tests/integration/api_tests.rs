use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;
use uuid::Uuid;

use crate::integration::common::{
    TEST_API_KEY, authed, body_json, json_request, setup_offline_app, setup_test_app,
};

// ---------------------------------------------------------------------------
// Auth and validation (no database needed)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_offline_app();

    let response = app
        .router
        .oneshot(Request::get("/v1/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_offline_app();

    let response = app
        .router
        .oneshot(
            Request::get("/v1/jobs")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_path_is_guarded_like_the_api() {
    let app = setup_offline_app();

    let response = app
        .router
        .oneshot(Request::get("/healthcheck").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("GRANTLINE_SERVER_API_KEY"));
}

#[tokio::test]
async fn lowercase_bearer_scheme_is_accepted() {
    let app = setup_offline_app();

    // Passes auth, then fails validation before touching the database.
    let response = app
        .router
        .oneshot(
            Request::get("/v1/jobs?status=paused")
                .header("authorization", format!("bearer {TEST_API_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scrape_rejects_malformed_url() {
    let app = setup_offline_app();

    let response = app
        .router
        .oneshot(json_request(
            Request::post("/v1/scrape"),
            &serde_json::json!({ "url": "not a url" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn scrape_reports_fetch_failure_in_body() {
    let app = setup_offline_app();

    // Loopback targets are refused by the fetcher, so every tier fails.
    let response = app
        .router
        .oneshot(json_request(
            Request::post("/v1/scrape"),
            &serde_json::json!({ "url": "http://127.0.0.1:1/calls" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["grantCount"], 0);
}

#[tokio::test]
async fn create_source_rejects_unknown_type() {
    let app = setup_offline_app();

    let response = app
        .router
        .oneshot(json_request(
            Request::post("/v1/sources"),
            &serde_json::json!({
                "name": "Ministry",
                "url": "https://ministry.example/calls",
                "type": "ftp",
                "region": "north",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_source_rejects_non_http_url() {
    let app = setup_offline_app();

    let response = app
        .router
        .oneshot(json_request(
            Request::post("/v1/sources"),
            &serde_json::json!({
                "name": "Ministry",
                "url": "ftp://ministry.example/calls",
                "type": "html",
                "region": "north",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn list_jobs_rejects_unknown_status() {
    let app = setup_offline_app();

    let response = app
        .router
        .oneshot(
            authed(Request::get("/v1/jobs?status=paused"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_returns_503_without_database() {
    let app = setup_offline_app();

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["status"], "unhealthy");
}

#[tokio::test]
async fn openapi_document_is_public() {
    let app = setup_offline_app();

    let response = app
        .router
        .oneshot(
            Request::get("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/v1/scrape"].is_object());
}

// ---------------------------------------------------------------------------
// Database-backed flows
// ---------------------------------------------------------------------------

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn create_enqueue_and_get_job() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Request::post("/v1/sources"),
            &serde_json::json!({
                "name": "Regional Fund",
                "url": "https://fund.example/calls",
                "type": "rss",
                "region": "north",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let source = body_json(response).await;
    assert_eq!(source["type"], "feed");
    assert_eq!(source["active"], true);
    let source_id = source["id"].as_str().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(
            authed(Request::post(format!("/v1/sources/{source_id}/enqueue")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "queued");
    let job_id = json["jobId"].as_str().unwrap().to_string();
    assert!(job_id.starts_with(&format!("scrape-{source_id}-")));

    let response = app
        .router
        .clone()
        .oneshot(
            authed(Request::get(format!("/v1/jobs/{job_id}")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], job_id.as_str());
    assert_eq!(json["sourceName"], "Regional Fund");
    assert_eq!(json["attempts"], 0);

    let response = app
        .router
        .oneshot(
            authed(Request::get("/v1/jobs?status=queued"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total"], 1);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn unknown_job_returns_404() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            authed(Request::get("/v1/jobs/scrape-missing"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn unknown_source_run_and_enqueue_return_404() {
    let app = setup_test_app().await;
    let id = Uuid::new_v4();

    for path in [
        format!("/v1/sources/{id}/run"),
        format!("/v1/sources/{id}/enqueue"),
    ] {
        let response = app
            .router
            .clone()
            .oneshot(
                Request::post(path)
                    .header("authorization", format!("Bearer {TEST_API_KEY}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn logs_for_source_without_runs_are_empty() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            authed(Request::get(format!(
                "/v1/sources/{}/logs?limit=500",
                Uuid::new_v4()
            )))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total"], 0);
    assert_eq!(json["logs"], serde_json::json!([]));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn run_all_with_no_sources_processes_nothing() {
    let app = setup_test_app().await;
    assert!(app.db.sources().list_active().await.unwrap().is_empty());

    let response = app
        .router
        .oneshot(
            authed(Request::post("/v1/sources/run"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["sourcesProcessed"], 0);
    assert_eq!(json["totalSaved"], 0);
}
