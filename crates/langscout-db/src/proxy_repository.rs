use sqlx::{PgPool, Pool, Postgres};

use langscout_core::error::AppError;
use langscout_core::models::{NewProxy, Proxy, ProxyCredentials, ProxyScheme};
use langscout_core::traits::ProxyRegistry;
use langscout_core::validation::validate_proxy;

/// PostgreSQL-backed proxy registry.
#[derive(Clone)]
pub struct ProxyRepository {
    pool: Pool<Postgres>,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProxyRow {
    id: i64,
    endpoint: String,
    scheme: String,
    username: Option<String>,
    password: Option<String>,
}

impl From<ProxyRow> for Proxy {
    fn from(row: ProxyRow) -> Self {
        Proxy {
            id: row.id,
            endpoint: row.endpoint,
            scheme: row.scheme.parse().unwrap_or(ProxyScheme::Https),
            credentials: row.username.map(|username| ProxyCredentials {
                username,
                password: row.password.unwrap_or_default(),
            }),
        }
    }
}

impl ProxyRegistry for ProxyRepository {
    async fn list_proxies(&self, limit: usize, offset: usize) -> Result<Vec<Proxy>, AppError> {
        // LIMIT NULL returns every row.
        let limit = (limit > 0).then_some(limit as i64);
        let rows = sqlx::query_as::<_, ProxyRow>(
            r#"
            SELECT id, endpoint, scheme, username, password
            FROM proxies
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn add_proxies(&self, proxies: &[NewProxy]) -> Result<u64, AppError> {
        for proxy in proxies {
            validate_proxy(proxy)?;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut inserted = 0;
        for proxy in proxies {
            let (username, password) = match &proxy.credentials {
                Some(c) => (Some(c.username.as_str()), Some(c.password.as_str())),
                None => (None, None),
            };
            let result = sqlx::query(
                r#"
                INSERT INTO proxies (endpoint, scheme, username, password)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&proxy.endpoint)
            .bind(proxy.scheme.as_str())
            .bind(username)
            .bind(password)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::info!(inserted, "Added proxies to registry");
        Ok(inserted)
    }

    async fn delete_proxy(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM proxies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
