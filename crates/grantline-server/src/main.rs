use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::map_response_body::MapResponseBodyLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use grantline_client::EnrichmentConfig;
use grantline_core::job::WorkerConfig;
use grantline_core::{Scheduler, SchedulerConfig, TracingWorkerReporter, WorkerService};
use grantline_db::{Database, DatabaseConfig};
use grantline_server::auth::API_KEY_ENV;
use grantline_server::routes;
use grantline_server::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("grantline=info".parse()?))
        .with_target(false)
        .init();

    let api_key = std::env::var(API_KEY_ENV).with_context(|| format!("{API_KEY_ENV} must be set"))?;
    let port = std::env::var("GRANTLINE_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let state = Arc::new(AppState::new(db, api_key, EnrichmentConfig::from_env())?);
    let cancel = CancellationToken::new();

    let mut background = Vec::new();
    if worker_enabled() {
        let worker = WorkerService::new(
            state.db.job_repo(),
            state.pipeline.clone(),
            WorkerConfig::default(),
        );
        let token = cancel.clone();
        background.push(tokio::spawn(async move {
            if let Err(e) = worker.run(token, &TracingWorkerReporter).await {
                tracing::error!(error = %e, "Worker exited with error");
            }
        }));

        let scheduler = Scheduler::new(state.enqueuer.clone(), SchedulerConfig::from_env());
        if let Some(handle) = scheduler.spawn(cancel.clone()) {
            background.push(handle);
        }
    } else {
        tracing::info!("Background worker disabled");
    }

    let app = routes::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(MapResponseBodyLayer::new(axum::body::Body::new))
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
    );

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    for handle in background {
        let _ = handle.await;
    }

    Ok(())
}

/// `GRANTLINE_WORKER_ENABLED=false` runs the API without the worker and scheduler.
fn worker_enabled() -> bool {
    std::env::var("GRANTLINE_WORKER_ENABLED")
        .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off"))
        .unwrap_or(true)
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
