use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::models::{BatchLookup, Domain, FetchedPage, NewProxy, Proxy};

/// Fetches a page through a proxy route.
///
/// `proxy` is `None` for the direct lane.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        proxy: Option<&Proxy>,
    ) -> impl Future<Output = Result<FetchedPage, AppError>> + Send;
}

/// Classifies the language of a fetched page.
///
/// Both steps are independently fallible; a failure in either marks the
/// visit as failed.
pub trait LanguageDetector: Send + Sync + Clone {
    /// Dominant language of the visible text, `None` when unknown.
    fn detect_content_language(&self, page: &str) -> Result<Option<String>, AppError>;

    /// Languages declared in markup (`link[hreflang]`, root `lang`).
    fn extract_tag_languages(&self, page: &str) -> Result<Vec<String>, AppError>;
}

/// Body posted to a batch callback once every domain has reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackPayload {
    pub code: String,
    pub domain_ids: Vec<i64>,
}

/// Notifies a batch submitter that results are ready.
pub trait CallbackNotifier: Send + Sync + Clone {
    fn notify(
        &self,
        callback: &str,
        payload: &CallbackPayload,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Persists crawl targets.
pub trait DomainStore: Send + Sync + Clone {
    /// Create missing domains and return all of them in submission order.
    ///
    /// Existing hosts are left untouched. Duplicate hosts map to one domain.
    fn upsert_domains(
        &self,
        hosts: &[String],
    ) -> impl Future<Output = Result<Vec<Domain>, AppError>> + Send;

    /// Overwrite the mutable fields of a domain.
    fn save_domain(&self, domain: &Domain) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_domain(&self, id: i64)
    -> impl Future<Output = Result<Option<Domain>, AppError>> + Send;

    fn get_domains(&self, ids: &[i64])
    -> impl Future<Output = Result<Vec<Domain>, AppError>> + Send;

    fn list_domains(
        &self,
        limit: usize,
        offset: usize,
    ) -> impl Future<Output = Result<Vec<Domain>, AppError>> + Send;

    /// Delete a domain together with its queue entry and batch links.
    ///
    /// Returns false if the domain did not exist.
    fn delete_domain(&self, id: i64) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Persists user-submitted batches.
pub trait BatchStore: Send + Sync + Clone {
    /// Record a batch and link it to its domains. Re-creating a code is a no-op.
    fn create_batch_record(
        &self,
        code: &str,
        domain_ids: &[i64],
        callback: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Look up a batch: ready once every linked domain is terminal or has
    /// been visited since the batch was recorded.
    fn lookup_batch(&self, code: &str) -> impl Future<Output = Result<BatchLookup, AppError>> + Send;
}

/// Registry the proxy pool is loaded from.
pub trait ProxyRegistry: Send + Sync + Clone {
    /// List proxies in stable id order. A `limit` of 0 means no limit.
    fn list_proxies(
        &self,
        limit: usize,
        offset: usize,
    ) -> impl Future<Output = Result<Vec<Proxy>, AppError>> + Send;

    /// Insert proxies, returning how many were stored.
    fn add_proxies(&self, proxies: &[NewProxy])
    -> impl Future<Output = Result<u64, AppError>> + Send;

    fn delete_proxy(&self, id: i64) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// A no-op CallbackNotifier for use when callbacks are not delivered.
#[derive(Debug, Clone)]
pub struct NullNotifier;

impl CallbackNotifier for NullNotifier {
    async fn notify(&self, _callback: &str, _payload: &CallbackPayload) -> Result<(), AppError> {
        Ok(())
    }
}
