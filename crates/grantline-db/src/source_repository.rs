use chrono::{DateTime, Utc};
use grantline_core::error::AppError;
use grantline_core::models::{NewSource, Source, SourceType};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// Source registry backed by the `sources` table.
#[derive(Clone)]
pub struct SourceRepository {
    pool: Pool<Postgres>,
}

impl SourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, source: &NewSource) -> Result<Source, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            INSERT INTO sources (name, url, type, region, active, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, name, url, type, region, active, metadata, last_run
            "#,
        )
        .bind(&source.name)
        .bind(&source.url)
        .bind(source.source_type.as_str())
        .bind(&source.region)
        .bind(source.active)
        .bind(&source.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.try_into()
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Source>, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, name, url, type, region, active, metadata, last_run
            FROM sources
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    /// Active sources, oldest registration first.
    pub async fn list_active(&self) -> Result<Vec<Source>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, name, url, type, region, active, metadata, last_run
            FROM sources
            WHERE active
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn touch_last_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(r#"UPDATE sources SET last_run = $2 WHERE id = $1"#)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    name: String,
    url: String,
    #[sqlx(rename = "type")]
    source_type: String,
    region: String,
    active: bool,
    metadata: serde_json::Value,
    last_run: Option<DateTime<Utc>>,
}

impl TryFrom<SourceRow> for Source {
    type Error = AppError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        let source_type: SourceType = row.source_type.parse().map_err(AppError::DatabaseError)?;
        Ok(Source {
            id: row.id,
            name: row.name,
            url: row.url,
            source_type,
            region: row.region,
            active: row.active,
            metadata: row.metadata,
            last_run: row.last_run,
        })
    }
}
