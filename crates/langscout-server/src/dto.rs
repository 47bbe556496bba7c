use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use langscout_core::models::{Domain, Proxy};
use langscout_core::proxy_pool::PoolStats;

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SubmitBatchRequest {
    /// Hosts to crawl, e.g. `example.com` or `https://example.com/de`.
    pub hosts: Vec<String>,
    /// URL that receives a POST once every domain has been visited.
    pub callback: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SubmitBatchResponse {
    pub code: String,
    pub expected: usize,
    /// False when the same batch was already live.
    pub created: bool,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BatchResultResponse {
    pub code: String,
    pub domains: Vec<DomainResponse>,
}

/// Returned with 202 while the batch still has outstanding domains.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BatchPendingResponse {
    pub code: String,
    /// Known only while the batch is tracked in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collected: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
}

// ---------------------------------------------------------------------------
// Domains
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DomainResponse {
    pub id: i64,
    pub host: String,
    pub response_state: String,
    pub error_count: u32,
    pub content_language: String,
    pub tag_languages: Vec<String>,
    pub sitemap_languages: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<Domain> for DomainResponse {
    fn from(domain: Domain) -> Self {
        Self {
            id: domain.id,
            host: domain.host,
            response_state: domain.response_state.to_string(),
            error_count: domain.error_count,
            content_language: domain.content_language,
            tag_languages: domain.tag_languages,
            sitemap_languages: domain.sitemap_languages,
            updated_at: domain.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct PageQuery {
    /// Defaults to 50, capped at 500.
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DomainListResponse {
    pub domains: Vec<DomainResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Proxies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ProxyInput {
    /// `host:port`
    pub endpoint: String,
    /// `https`, `socks4` or `socks5`.
    pub scheme: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AddProxiesRequest {
    pub proxies: Vec<ProxyInput>,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AddProxiesResponse {
    pub inserted: u64,
    /// Proxies in the pool after the reload.
    pub pool_size: usize,
}

/// Credentials are never echoed back.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProxyResponse {
    pub id: i64,
    pub endpoint: String,
    pub scheme: String,
    pub authenticated: bool,
}

impl From<Proxy> for ProxyResponse {
    fn from(proxy: Proxy) -> Self {
        Self {
            id: proxy.id,
            endpoint: proxy.endpoint,
            scheme: proxy.scheme.to_string(),
            authenticated: proxy.credentials.is_some(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProxyListResponse {
    pub proxies: Vec<ProxyResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PoolStatsResponse {
    pub proxies: usize,
    pub capacity_per_route: usize,
    pub total_capacity: usize,
    pub outstanding_leases: usize,
}

impl From<PoolStats> for PoolStatsResponse {
    fn from(stats: PoolStats) -> Self {
        Self {
            proxies: stats.proxies,
            capacity_per_route: stats.capacity_per_route,
            total_capacity: stats.total_capacity(),
            outstanding_leases: stats.outstanding(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub pool: PoolStatsResponse,
    pub live_batches: usize,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EchoResponse {
    pub received: bool,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
