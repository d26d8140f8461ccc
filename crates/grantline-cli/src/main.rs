use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use grantline_client::{DataServiceEnricher, EnrichmentConfig, PdfTextExtractor, ReqwestFetcher};
use grantline_core::models::{NewSource, SourceType};
use grantline_core::scrape::normalize_log_limit;
use grantline_core::traits::LogNotifier;
use grantline_core::{
    ActiveSourceEnqueuer, CrawlConfig, EnqueueService, FallbackConfig, Scheduler, SchedulerConfig,
    ScrapeService, TieredScraper, TracingWorkerReporter, WorkerConfig, WorkerService,
};
use grantline_db::{Database, DatabaseConfig};

type Pipeline =
    ScrapeService<ReqwestFetcher, DataServiceEnricher, PdfTextExtractor, Database, LogNotifier>;

#[derive(Parser)]
#[command(name = "grantline", version, about = "Grant announcement ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a URL through the extraction tiers and print the result (nothing is saved)
    Scrape {
        /// Absolute http(s) URL
        url: String,

        /// Maximum crawl depth
        #[arg(long, default_value_t = 2)]
        max_depth: usize,

        /// Maximum pages per crawl
        #[arg(long, default_value_t = 5)]
        max_pages: usize,
    },

    /// Run registered sources now and persist new grants
    Run {
        /// Source to run
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        source_id: Option<Uuid>,

        /// Run every active source
        #[arg(long)]
        all: bool,
    },

    /// Queue scrape jobs for the background worker
    Enqueue {
        /// Source to queue
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        source_id: Option<Uuid>,

        /// Queue every active source
        #[arg(long)]
        all: bool,
    },

    /// Show recent scrape logs for a source
    Logs {
        source_id: Uuid,

        /// Number of entries (0 or omitted means 10, capped at 50)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Manage the source registry
    Source {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Process queued jobs until Ctrl+C
    Worker {
        /// Worker identifier (random if omitted)
        #[arg(long, env = "GRANTLINE_WORKER_ID")]
        worker_id: Option<String>,

        /// Seconds between polls when the queue is empty
        #[arg(long, env = "GRANTLINE_POLL_INTERVAL_SECS", default_value_t = 5)]
        poll_interval: u64,

        /// Do not start the periodic scheduler alongside the worker
        #[arg(long, default_value_t = false)]
        no_scheduler: bool,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Register a new source
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        url: String,

        /// html, api, feed (rss) or document (pdf)
        #[arg(long = "type")]
        source_type: SourceType,

        #[arg(long)]
        region: String,

        /// Register the source as inactive
        #[arg(long, default_value_t = false)]
        inactive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("grantline=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            url,
            max_depth,
            max_pages,
        } => cmd_scrape(&url, max_depth, max_pages).await?,
        Commands::Run { source_id, all } => {
            let pipeline = build_pipeline(connect_db().await?)?;
            match source_id {
                Some(id) if !all => print_json(&pipeline.run_source_by_id(id).await?)?,
                _ => print_json(&pipeline.run_all_active_sources().await?)?,
            }
        }
        Commands::Enqueue { source_id, all } => {
            let db = connect_db().await?;
            let enqueuer = EnqueueService::new(db.job_repo(), db.clone());
            match source_id {
                Some(id) if !all => print_json(&enqueuer.enqueue_source_by_id(id).await?)?,
                _ => print_json(&enqueuer.enqueue_active_sources().await?)?,
            }
        }
        Commands::Logs { source_id, limit } => {
            let db = connect_db().await?;
            cmd_logs(&db, source_id, limit).await?;
        }
        Commands::Source {
            command:
                SourceCommands::Add {
                    name,
                    url,
                    source_type,
                    region,
                    inactive,
                },
        } => {
            grantline_core::crawler::parse_http_url(&url)?;
            let db = connect_db().await?;
            let source = db
                .sources()
                .create(&NewSource {
                    name,
                    url,
                    source_type,
                    region,
                    active: !inactive,
                    metadata: serde_json::json!({}),
                })
                .await?;
            tracing::info!(source_id = %source.id, "Source registered");
            print_json(&source)?;
        }
        Commands::Worker {
            worker_id,
            poll_interval,
            no_scheduler,
        } => {
            let db = connect_db().await?;
            cmd_worker(db, worker_id, poll_interval, !no_scheduler).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().context("DATABASE_URL not set")?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn build_pipeline(db: Database) -> Result<Pipeline> {
    let fetcher = ReqwestFetcher::new().context("Failed to create HTTP client")?;
    let enricher = DataServiceEnricher::new(EnrichmentConfig::from_env())
        .context("Failed to create enrichment client")?;

    Ok(ScrapeService::new(
        fetcher,
        enricher,
        PdfTextExtractor,
        db,
        LogNotifier,
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_scrape(url: &str, max_depth: usize, max_pages: usize) -> Result<()> {
    grantline_core::crawler::parse_http_url(url)?;

    let fetcher = ReqwestFetcher::new().context("Failed to create HTTP client")?;
    let crawl = CrawlConfig {
        max_depth,
        max_pages,
        ..CrawlConfig::default()
    };
    let scraper = TieredScraper::standard(fetcher, crawl, FallbackConfig::default());

    tracing::info!("Scraping {}", url);
    let outcome = scraper.scrape_with_fallback(url).await;

    tracing::info!(
        method = %outcome.method,
        pages = outcome.pages.len(),
        grant_count = outcome.grant_count,
        "Scrape finished"
    );
    print_json(&outcome)?;

    if !outcome.success {
        anyhow::bail!(
            "{}",
            outcome.error.as_deref().unwrap_or("All scraping tiers failed")
        );
    }
    Ok(())
}

async fn cmd_logs(db: &Database, source_id: Uuid, limit: Option<usize>) -> Result<()> {
    let logs = db
        .logs()
        .recent(source_id, normalize_log_limit(limit))
        .await?;

    if logs.is_empty() {
        println!("No scrape logs found for source {source_id}");
        return Ok(());
    }

    println!("Scrape logs for {source_id}:\n");

    for log in &logs {
        let error = log
            .result
            .error
            .as_deref()
            .map(|e| format!(" error: {e}"))
            .unwrap_or_default();

        println!(
            "  [{}] {} method={} found={} saved={}{}",
            log.status.as_str(),
            log.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            log.result.method,
            log.result.grant_count,
            log.result.saved_count,
            error,
        );
    }

    println!("\nTotal: {} entries", logs.len());

    Ok(())
}

async fn cmd_worker(
    db: Database,
    worker_id: Option<String>,
    poll_interval: u64,
    with_scheduler: bool,
) -> Result<()> {
    let mut config = WorkerConfig::default().with_poll_interval(Duration::from_secs(poll_interval));
    if let Some(id) = worker_id {
        config = config.with_worker_id(id);
    }

    let pipeline = build_pipeline(db.clone())?;
    let worker = WorkerService::new(db.job_repo(), pipeline, config);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down");
            shutdown.cancel();
        }
    });

    let scheduler = if with_scheduler {
        let enqueuer = EnqueueService::new(db.job_repo(), db.clone());
        Scheduler::new(enqueuer, SchedulerConfig::from_env()).spawn(cancel.clone())
    } else {
        None
    };

    worker.run(cancel.clone(), &TracingWorkerReporter).await?;

    cancel.cancel();
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }

    Ok(())
}
