use chrono::{DateTime, Utc};
use grantline_core::AppError;
use grantline_core::models::{NewScrapeLog, SavedGrant, ScrapeLog, ScrapedGrant, Source};
use grantline_core::traits::{GrantStore, ScrapeLogStore, SourceRegistry};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::grant_repository::GrantRepository;
use crate::job_repository::ScrapeJobRepository;
use crate::log_repository::ScrapeLogRepository;
use crate::source_repository::SourceRepository;

/// Central database facade: owns the connection pool, runs migrations,
/// vends repository instances and serves as the pipeline's storage.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn sources(&self) -> SourceRepository {
        SourceRepository::new(self.pool.clone())
    }

    pub fn grants(&self) -> GrantRepository {
        GrantRepository::new(self.pool.clone())
    }

    pub fn logs(&self) -> ScrapeLogRepository {
        ScrapeLogRepository::new(self.pool.clone())
    }

    pub fn job_repo(&self) -> ScrapeJobRepository {
        ScrapeJobRepository::new(self.pool.clone())
    }

    /// Round-trips a trivial query.
    pub async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl SourceRegistry for Database {
    async fn get_source(&self, id: Uuid) -> Result<Option<Source>, AppError> {
        self.sources().get(id).await
    }

    async fn list_active_sources(&self) -> Result<Vec<Source>, AppError> {
        self.sources().list_active().await
    }

    async fn touch_last_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        self.sources().touch_last_run(id, at).await
    }
}

impl GrantStore for Database {
    async fn save_new_grants(
        &self,
        source: &Source,
        grants: &[ScrapedGrant],
    ) -> Result<Vec<SavedGrant>, AppError> {
        self.grants().save_new(source, grants).await
    }
}

impl ScrapeLogStore for Database {
    async fn append_log(&self, log: &NewScrapeLog) -> Result<Uuid, AppError> {
        self.logs().append(log).await
    }

    async fn recent_logs(&self, source_id: Uuid, limit: usize) -> Result<Vec<ScrapeLog>, AppError> {
        self.logs().recent(source_id, limit).await
    }
}
