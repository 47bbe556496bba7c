use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use langscout_core::error::AppError;
use langscout_core::models::{BatchLookup, Domain};
use langscout_core::traits::BatchStore;

use crate::domain_repository::{DOMAIN_COLUMNS, DomainRow};

/// PostgreSQL-backed batch records.
///
/// The in-memory `ResultTracker` is authoritative while the process runs;
/// these records let batch status survive a restart.
#[derive(Clone)]
pub struct BatchRepository {
    pool: Pool<Postgres>,
}

impl BatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete every batch whose lifetime has ended. Links cascade.
    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM batches WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

impl BatchStore for BatchRepository {
    async fn create_batch_record(
        &self,
        code: &str,
        domain_ids: &[i64],
        callback: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        // A live code is left alone; an expired one is revived in place.
        let created: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO batches (code, expected_count, callback, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (code) DO UPDATE
            SET expected_count = EXCLUDED.expected_count,
                callback = EXCLUDED.callback,
                created_at = NOW(),
                expires_at = EXCLUDED.expires_at
            WHERE batches.expires_at <= NOW()
            RETURNING code
            "#,
        )
        .bind(code)
        .bind(i32::try_from(domain_ids.len()).unwrap_or(i32::MAX))
        .bind(callback)
        .bind(expires_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if created.is_some() {
            sqlx::query("DELETE FROM batch_domains WHERE code = $1")
                .bind(code)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO batch_domains (code, domain_id)
                SELECT $1, UNNEST($2::bigint[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(code)
            .bind(domain_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn lookup_batch(&self, code: &str) -> Result<BatchLookup, AppError> {
        let batch: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT created_at FROM batches WHERE code = $1 AND expires_at > NOW()",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let Some((created_at,)) = batch else {
            return Ok(BatchLookup::NotFound);
        };

        let rows = sqlx::query_as::<_, DomainRow>(&format!(
            r#"
            SELECT {DOMAIN_COLUMNS} FROM domains d
            JOIN batch_domains bd ON bd.domain_id = d.id
            WHERE bd.code = $1
            ORDER BY d.id
            "#
        ))
        .bind(code)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let domains: Vec<Domain> = rows.into_iter().map(Into::into).collect();
        Ok(if domains.iter().all(|d| d.is_settled_since(created_at)) {
            BatchLookup::Ready(domains)
        } else {
            BatchLookup::NotReady
        })
    }
}
