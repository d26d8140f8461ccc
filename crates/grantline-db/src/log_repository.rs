use chrono::{DateTime, Utc};
use grantline_core::error::AppError;
use grantline_core::models::{LogStatus, NewScrapeLog, ScrapeLog};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// Append-only scrape audit trail.
#[derive(Clone)]
pub struct ScrapeLogRepository {
    pool: Pool<Postgres>,
}

impl ScrapeLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, log: &NewScrapeLog) -> Result<Uuid, AppError> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO scrape_logs (source_id, status, result, timestamp)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(log.source_id)
        .bind(log.status.as_str())
        .bind(serde_json::to_value(&log.result)?)
        .bind(log.timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.0)
    }

    /// Most recent first.
    pub async fn recent(&self, source_id: Uuid, limit: usize) -> Result<Vec<ScrapeLog>, AppError> {
        let rows = sqlx::query_as::<_, ScrapeLogRow>(
            r#"
            SELECT id, source_id, status, result, timestamp
            FROM scrape_logs
            WHERE source_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(source_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ScrapeLogRow {
    id: Uuid,
    source_id: Uuid,
    status: String,
    result: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl TryFrom<ScrapeLogRow> for ScrapeLog {
    type Error = AppError;

    fn try_from(row: ScrapeLogRow) -> Result<Self, Self::Error> {
        Ok(ScrapeLog {
            id: row.id,
            source_id: row.source_id,
            status: row.status.parse().unwrap_or(LogStatus::Error),
            result: serde_json::from_value(row.result)?,
            timestamp: row.timestamp,
        })
    }
}
