use std::error::Error as _;
use std::time::Duration;

use langscout_core::error::AppError;
use langscout_core::models::{FetchedPage, Proxy};
use langscout_core::traits::Fetcher;
use moka::future::Cache;
use reqwest::Client;
use reqwest::header::CONTENT_LANGUAGE;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; langscout/0.1)";
const DIRECT_ROUTE: &str = "direct";

/// HTTP fetcher using reqwest.
///
/// Keeps one client per route (each proxy, plus the direct lane) so
/// connection pools are reused across visits. Every request is bounded by
/// the response timeout. Non-2xx responses are returned, not treated as
/// errors; only transport failures produce `Err`.
#[derive(Clone)]
pub struct ReqwestFetcher {
    clients: Cache<String, Client>,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(15))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let clients = Cache::builder()
            .max_capacity(4096)
            .time_to_idle(Duration::from_secs(2 * 60 * 60))
            .build();
        Self { clients, timeout }
    }

    async fn client_for(&self, proxy: Option<&Proxy>) -> Result<Client, AppError> {
        let key = route_key(proxy);
        let timeout = self.timeout;
        let proxy_url = proxy.map(Proxy::url);

        self.clients
            .try_get_with(key, async move { build_client(proxy_url.as_deref(), timeout) })
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to build client: {e}")))
    }

    /// Number of cached per-route clients.
    ///
    /// Flushes the cache's pending bookkeeping first, since moka updates its
    /// entry count lazily.
    pub async fn cached_routes(&self) -> u64 {
        self.clients.run_pending_tasks().await;
        self.clients.entry_count()
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, proxy: Option<&Proxy>) -> Result<FetchedPage, AppError> {
        let client = self.client_for(proxy).await?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let content_languages = response
            .headers()
            .get_all(CONTENT_LANGUAGE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(split_content_language)
            .collect();

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout.as_secs())
            } else {
                AppError::NetworkError(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(FetchedPage {
            status,
            body,
            content_languages,
        })
    }
}

impl ReqwestFetcher {
    fn classify(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout.as_secs())
        } else if is_dns_error(&e) {
            AppError::DnsError(e.to_string())
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

fn build_client(proxy_url: Option<&str>, timeout: Duration) -> Result<Client, AppError> {
    let builder = Client::builder().user_agent(USER_AGENT).timeout(timeout);
    let builder = match proxy_url {
        Some(url) => builder.proxy(
            reqwest::Proxy::all(url)
                .map_err(|e| AppError::HttpError(format!("Invalid proxy: {e}")))?,
        ),
        None => builder.no_proxy(),
    };
    builder
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}

fn route_key(proxy: Option<&Proxy>) -> String {
    match proxy {
        Some(p) => format!("{}#{}", p.id, p.url()),
        None => DIRECT_ROUTE.to_string(),
    }
}

/// Split a `Content-Language` header value: `"de-DE, en"` → `["de-DE", "en"]`.
fn split_content_language(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Walk the error chain looking for a resolver failure.
fn is_dns_error(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        let msg = cause.to_string().to_ascii_lowercase();
        if msg.contains("dns error")
            || msg.contains("failed to lookup address")
            || msg.contains("name or service not known")
            || msg.contains("no such host")
        {
            return true;
        }
        source = cause.source();
    }
    false
}
