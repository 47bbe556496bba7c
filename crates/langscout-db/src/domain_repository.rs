use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use langscout_core::error::AppError;
use langscout_core::models::{ClaimedTask, Domain, Tier};
use langscout_core::traits::DomainStore;
use langscout_core::validation::{normalize_host, prepare_domain};
use langscout_core::work_queue::WorkQueue;

/// PostgreSQL-backed domain store and work queue.
///
/// Claims delete the queue row selected with `FOR UPDATE SKIP LOCKED`, so
/// concurrent schedulers never receive the same domain.
#[derive(Clone)]
pub struct DomainRepository {
    pool: Pool<Postgres>,
}

impl DomainRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn claim(&self, tier: Tier) -> Result<Option<ClaimedTask>, AppError> {
        let row = sqlx::query_as::<_, ClaimedRow>(&claim_query(tier_filter(tier)))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(|row| ClaimedTask {
            domain: row.domain.into(),
            tier,
            batch_codes: row.batch_codes,
        }))
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
pub(crate) struct DomainRow {
    id: i64,
    host: String,
    response_state: String,
    error_count: i32,
    content_language: String,
    tag_languages: Vec<String>,
    sitemap_languages: Vec<String>,
    updated_at: DateTime<Utc>,
}

impl From<DomainRow> for Domain {
    fn from(row: DomainRow) -> Self {
        Domain {
            id: row.id,
            host: row.host,
            response_state: row.response_state.parse().unwrap_or_default(),
            error_count: row.error_count.max(0) as u32,
            content_language: row.content_language,
            tag_languages: row.tag_languages,
            sitemap_languages: row.sitemap_languages,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    #[sqlx(flatten)]
    domain: DomainRow,
    batch_codes: Vec<String>,
}

pub(crate) const DOMAIN_COLUMNS: &str = "d.id, d.host, d.response_state, d.error_count, \
    d.content_language, d.tag_languages, d.sitemap_languages, d.updated_at";

const LIVE_BATCH_EXISTS: &str = "EXISTS (
    SELECT 1 FROM batch_domains bd
    JOIN batches b ON b.code = bd.code
    WHERE bd.domain_id = q.domain_id AND b.expires_at > NOW()
)";

fn tier_filter(tier: Tier) -> String {
    match tier {
        Tier::User => format!("d.response_state = 'unvisited' AND {LIVE_BATCH_EXISTS}"),
        Tier::ErrorRetry => {
            "d.response_state IN ('error', 'banned') AND q.due_at <= NOW()".to_string()
        }
        Tier::ListScan => format!(
            "d.response_state = 'unvisited' AND q.due_at <= NOW() AND NOT {LIVE_BATCH_EXISTS}"
        ),
    }
}

/// Atomic select-one-and-delete over the queue, returning the domain and
/// the codes of its live batches.
fn claim_query(filter: String) -> String {
    format!(
        r#"
        WITH claimed AS (
            DELETE FROM domain_queue
            WHERE domain_id = (
                SELECT q.domain_id FROM domain_queue q
                JOIN domains d ON d.id = q.domain_id
                WHERE {filter}
                ORDER BY q.due_at, q.domain_id
                FOR UPDATE OF q SKIP LOCKED
                LIMIT 1
            )
            RETURNING domain_id
        )
        SELECT {DOMAIN_COLUMNS},
            ARRAY(
                SELECT b.code FROM batch_domains bd
                JOIN batches b ON b.code = bd.code
                WHERE bd.domain_id = d.id AND b.expires_at > NOW()
                ORDER BY b.code
            ) AS batch_codes
        FROM claimed c
        JOIN domains d ON d.id = c.domain_id
        "#
    )
}

impl DomainStore for DomainRepository {
    async fn upsert_domains(&self, hosts: &[String]) -> Result<Vec<Domain>, AppError> {
        let mut normalized: Vec<String> = Vec::with_capacity(hosts.len());
        for host in hosts {
            let host = normalize_host(host)?;
            if !normalized.contains(&host) {
                normalized.push(host);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO domains (host)
            SELECT * FROM UNNEST($1::text[])
            ON CONFLICT (host) DO NOTHING
            "#,
        )
        .bind(&normalized)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let rows = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains d WHERE d.host = ANY($1)"
        ))
        .bind(&normalized)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut domains: Vec<Domain> = rows.into_iter().map(Into::into).collect();
        domains.sort_by_key(|d| normalized.iter().position(|h| *h == d.host));
        Ok(domains)
    }

    async fn save_domain(&self, domain: &Domain) -> Result<(), AppError> {
        let mut domain = domain.clone();
        prepare_domain(&mut domain)?;

        let result = sqlx::query(
            r#"
            UPDATE domains
            SET response_state = $2, error_count = $3, content_language = $4,
                tag_languages = $5, sitemap_languages = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(domain.id)
        .bind(domain.response_state.as_str())
        .bind(i32::try_from(domain.error_count).unwrap_or(i32::MAX))
        .bind(&domain.content_language)
        .bind(&domain.tag_languages)
        .bind(&domain.sitemap_languages)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::DatabaseError(format!(
                "domain {} not found",
                domain.id
            )));
        }
        Ok(())
    }

    async fn get_domain(&self, id: i64) -> Result<Option<Domain>, AppError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains d WHERE d.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn get_domains(&self, ids: &[i64]) -> Result<Vec<Domain>, AppError> {
        let rows = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains d WHERE d.id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut domains: Vec<Domain> = rows.into_iter().map(Into::into).collect();
        domains.sort_by_key(|d| ids.iter().position(|id| *id == d.id));
        Ok(domains)
    }

    async fn list_domains(&self, limit: usize, offset: usize) -> Result<Vec<Domain>, AppError> {
        let rows = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains d ORDER BY d.id LIMIT $1 OFFSET $2"
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_domain(&self, id: i64) -> Result<bool, AppError> {
        // Queue entries and batch links cascade.
        let result = sqlx::query("DELETE FROM domains WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

impl WorkQueue for DomainRepository {
    async fn claim_user_task(&self) -> Result<Option<ClaimedTask>, AppError> {
        self.claim(Tier::User).await
    }

    async fn claim_error_task(&self) -> Result<Option<ClaimedTask>, AppError> {
        self.claim(Tier::ErrorRetry).await
    }

    async fn claim_list_task(&self) -> Result<Option<ClaimedTask>, AppError> {
        self.claim(Tier::ListScan).await
    }

    async fn enqueue(&self, domain_id: i64, due_at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO domain_queue (domain_id, due_at)
            VALUES ($1, $2)
            ON CONFLICT (domain_id) DO NOTHING
            "#,
        )
        .bind(domain_id)
        .bind(due_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn requeue(&self, domain_id: i64, due_at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO domain_queue (domain_id, due_at)
            VALUES ($1, $2)
            ON CONFLICT (domain_id) DO UPDATE SET due_at = EXCLUDED.due_at
            "#,
        )
        .bind(domain_id)
        .bind(due_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn dequeue(&self, domain_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM domain_queue WHERE domain_id = $1")
            .bind(domain_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM domain_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count.max(0) as u64)
    }

    async fn live_batch_codes(&self, domain_id: i64) -> Result<Vec<String>, AppError> {
        let codes: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT b.code FROM batch_domains bd
            JOIN batches b ON b.code = bd.code
            WHERE bd.domain_id = $1 AND b.expires_at > NOW()
            ORDER BY b.code
            "#,
        )
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(codes.into_iter().map(|(code,)| code).collect())
    }
}
