//! Test utilities: hand-written mocks for the core traits.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::memory::MemoryStore;
use crate::models::{ClaimedTask, Domain, FetchedPage, NewProxy, Proxy, ProxyScheme};
use crate::scheduler::{CrawlEvent, CrawlReporter};
use crate::traits::{
    CallbackNotifier, CallbackPayload, DomainStore, Fetcher, LanguageDetector, ProxyRegistry,
};
use crate::work_queue::WorkQueue;

pub fn proxy_fixture(id: i64) -> Proxy {
    Proxy {
        id,
        endpoint: format!("10.0.0.{id}:1080"),
        scheme: ProxyScheme::Socks5,
        credentials: None,
    }
}

pub fn page(status: u16, body: &str, content_languages: &[&str]) -> FetchedPage {
    FetchedPage {
        status,
        body: body.to_string(),
        content_languages: content_languages.iter().map(|l| l.to_string()).collect(),
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that returns queued responses and records every request.
#[derive(Clone)]
pub struct MockFetcher {
    /// Each call pops the first element. If empty, returns a plain 200 page.
    responses: Arc<Mutex<Vec<Result<FetchedPage, AppError>>>>,
    calls: Arc<Mutex<Vec<(String, Option<i64>)>>>,
    delay: Duration,
}

impl MockFetcher {
    pub fn new(page: FetchedPage) -> Self {
        Self::with_responses(vec![Ok(page)])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<FetchedPage, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requested URLs with the proxy id used (`None` for the direct lane).
    pub fn calls(&self) -> Vec<(String, Option<i64>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, proxy: Option<&Proxy>) -> Result<FetchedPage, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), proxy.map(|p| p.id)));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(page(200, "<html><body>default</body></html>", &[]))
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockDetector
// ---------------------------------------------------------------------------

/// Mock detector with fixed answers and one-shot injectable failures.
#[derive(Clone)]
pub struct MockDetector {
    language: Option<String>,
    tags: Vec<String>,
    content_error: Arc<Mutex<Option<AppError>>>,
    tag_error: Arc<Mutex<Option<AppError>>>,
}

impl MockDetector {
    pub fn new(language: Option<&str>) -> Self {
        Self {
            language: language.map(str::to_string),
            tags: Vec::new(),
            content_error: Arc::new(Mutex::new(None)),
            tag_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_content_error(self, error: AppError) -> Self {
        *self.content_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_tag_error(self, error: AppError) -> Self {
        *self.tag_error.lock().unwrap() = Some(error);
        self
    }
}

impl LanguageDetector for MockDetector {
    fn detect_content_language(&self, _page: &str) -> Result<Option<String>, AppError> {
        if let Some(err) = self.content_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.language.clone())
    }

    fn extract_tag_languages(&self, _page: &str) -> Result<Vec<String>, AppError> {
        if let Some(err) = self.tag_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.tags.clone())
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

/// Records callback deliveries; optionally fails every call.
#[derive(Clone, Default)]
pub struct MockNotifier {
    calls: Arc<Mutex<Vec<(String, CallbackPayload)>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error(error: AppError) -> Self {
        let notifier = Self::default();
        *notifier.fail_with.lock().unwrap() = Some(error.to_string());
        notifier
    }

    pub fn calls(&self) -> Vec<(String, CallbackPayload)> {
        self.calls.lock().unwrap().clone()
    }
}

impl CallbackNotifier for MockNotifier {
    async fn notify(&self, callback: &str, payload: &CallbackPayload) -> Result<(), AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((callback.to_string(), payload.clone()));
        match self.fail_with.lock().unwrap().as_ref() {
            Some(msg) => Err(AppError::HttpError(msg.clone())),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockRegistry
// ---------------------------------------------------------------------------

/// Proxy registry backed by a fixed list.
#[derive(Clone)]
pub struct MockRegistry {
    proxies: Arc<Mutex<Vec<Proxy>>>,
    failing: bool,
}

impl MockRegistry {
    pub fn new(proxies: Vec<Proxy>) -> Self {
        Self {
            proxies: Arc::new(Mutex::new(proxies)),
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            proxies: Arc::new(Mutex::new(Vec::new())),
            failing: true,
        }
    }
}

impl ProxyRegistry for MockRegistry {
    async fn list_proxies(&self, limit: usize, offset: usize) -> Result<Vec<Proxy>, AppError> {
        if self.failing {
            return Err(AppError::DatabaseError("registry unavailable".into()));
        }
        let limit = if limit == 0 { usize::MAX } else { limit };
        Ok(self
            .proxies
            .lock()
            .unwrap()
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn add_proxies(&self, proxies: &[NewProxy]) -> Result<u64, AppError> {
        let mut stored = self.proxies.lock().unwrap();
        for proxy in proxies {
            let id = stored.len() as i64 + 1;
            stored.push(Proxy {
                id,
                endpoint: proxy.endpoint.clone(),
                scheme: proxy.scheme,
                credentials: proxy.credentials.clone(),
            });
        }
        Ok(proxies.len() as u64)
    }

    async fn delete_proxy(&self, id: i64) -> Result<bool, AppError> {
        let mut stored = self.proxies.lock().unwrap();
        let before = stored.len();
        stored.retain(|p| p.id != id);
        Ok(stored.len() != before)
    }
}

// ---------------------------------------------------------------------------
// FaultyStore
// ---------------------------------------------------------------------------

/// Wraps a [`MemoryStore`] and injects failures into saves or claims.
#[derive(Clone)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_saves: bool,
    /// Remaining claim calls that fail; `None` fails forever.
    claim_failures: Arc<Mutex<Option<u32>>>,
}

impl FaultyStore {
    pub fn failing_saves(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_saves: true,
            claim_failures: Arc::new(Mutex::new(Some(0))),
        }
    }

    pub fn failing_claims(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_saves: false,
            claim_failures: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing_claims_times(inner: MemoryStore, times: u32) -> Self {
        Self {
            inner,
            fail_saves: false,
            claim_failures: Arc::new(Mutex::new(Some(times))),
        }
    }

    fn claim_guard(&self) -> Result<(), AppError> {
        let mut remaining = self.claim_failures.lock().unwrap();
        match remaining.as_mut() {
            None => Err(AppError::DatabaseError("connection refused".into())),
            Some(0) => Ok(()),
            Some(n) => {
                *n -= 1;
                Err(AppError::DatabaseError("connection refused".into()))
            }
        }
    }
}

impl DomainStore for FaultyStore {
    async fn upsert_domains(&self, hosts: &[String]) -> Result<Vec<Domain>, AppError> {
        self.inner.upsert_domains(hosts).await
    }

    async fn save_domain(&self, domain: &Domain) -> Result<(), AppError> {
        if self.fail_saves {
            return Err(AppError::DatabaseError("disk full".into()));
        }
        self.inner.save_domain(domain).await
    }

    async fn get_domain(&self, id: i64) -> Result<Option<Domain>, AppError> {
        self.inner.get_domain(id).await
    }

    async fn get_domains(&self, ids: &[i64]) -> Result<Vec<Domain>, AppError> {
        self.inner.get_domains(ids).await
    }

    async fn list_domains(&self, limit: usize, offset: usize) -> Result<Vec<Domain>, AppError> {
        self.inner.list_domains(limit, offset).await
    }

    async fn delete_domain(&self, id: i64) -> Result<bool, AppError> {
        self.inner.delete_domain(id).await
    }
}

impl WorkQueue for FaultyStore {
    async fn claim_user_task(&self) -> Result<Option<ClaimedTask>, AppError> {
        self.claim_guard()?;
        self.inner.claim_user_task().await
    }

    async fn claim_error_task(&self) -> Result<Option<ClaimedTask>, AppError> {
        self.inner.claim_error_task().await
    }

    async fn claim_list_task(&self) -> Result<Option<ClaimedTask>, AppError> {
        self.inner.claim_list_task().await
    }

    async fn enqueue(&self, domain_id: i64, due_at: DateTime<Utc>) -> Result<(), AppError> {
        self.inner.enqueue(domain_id, due_at).await
    }

    async fn requeue(&self, domain_id: i64, due_at: DateTime<Utc>) -> Result<(), AppError> {
        self.inner.requeue(domain_id, due_at).await
    }

    async fn dequeue(&self, domain_id: i64) -> Result<(), AppError> {
        self.inner.dequeue(domain_id).await
    }

    async fn pending_count(&self) -> Result<u64, AppError> {
        self.inner.pending_count().await
    }

    async fn live_batch_codes(&self, domain_id: i64) -> Result<Vec<String>, AppError> {
        self.inner.live_batch_codes(domain_id).await
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records the name of every scheduler event.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == name)
            .count()
    }
}

impl CrawlReporter for MockReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        self.events.lock().unwrap().push(event.name().to_string());
    }
}
