use chrono::{DateTime, NaiveDate, Utc};
use grantline_core::error::AppError;
use grantline_core::models::{GrantStatus, NewGrant, SavedGrant, ScrapedGrant, Source};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// Grant persistence. A grant is unique per (source, trimmed lowercase title).
#[derive(Clone)]
pub struct GrantRepository {
    pool: Pool<Postgres>,
}

impl GrantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts every grant not already stored for `source`, in one transaction.
    ///
    /// Invalid grants are skipped. Returns only the rows actually inserted.
    pub async fn save_new(
        &self,
        source: &Source,
        grants: &[ScrapedGrant],
    ) -> Result<Vec<SavedGrant>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut saved = Vec::new();
        for grant in grants.iter().filter_map(|g| NewGrant::prepare(source, g)) {
            let row = sqlx::query_as::<_, GrantRow>(
                r#"
                INSERT INTO grants
                    (source_id, title, description, amount, deadline, region,
                     official_url, status, sectors, beneficiaries)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (source_id, lower(btrim(title))) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(grant.source_id)
            .bind(&grant.title)
            .bind(&grant.description)
            .bind(grant.amount)
            .bind(grant.deadline)
            .bind(&grant.region)
            .bind(&grant.official_url)
            .bind(grant.status.as_str())
            .bind(&grant.sectors)
            .bind(&grant.beneficiaries)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            match row {
                Some(row) => saved.push(row.into()),
                None => tracing::debug!(source_id = %source.id, title = %grant.title, "Grant already stored"),
            }
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(saved)
    }

    /// Newest first.
    pub async fn list_for_source(
        &self,
        source_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SavedGrant>, AppError> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT * FROM grants
            WHERE source_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(source_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct GrantRow {
    id: Uuid,
    source_id: Uuid,
    title: String,
    description: String,
    amount: Option<f64>,
    deadline: Option<NaiveDate>,
    region: String,
    official_url: String,
    status: String,
    sectors: Option<Vec<String>>,
    beneficiaries: Option<Vec<String>>,
    created_at: DateTime<Utc>,
}

impl From<GrantRow> for SavedGrant {
    fn from(row: GrantRow) -> Self {
        SavedGrant {
            id: row.id,
            source_id: row.source_id,
            title: row.title,
            description: row.description,
            amount: row.amount,
            deadline: row.deadline,
            region: row.region,
            official_url: row.official_url,
            status: row.status.parse().unwrap_or(GrantStatus::Open),
            sectors: row.sectors,
            beneficiaries: row.beneficiaries,
            created_at: row.created_at,
        }
    }
}
