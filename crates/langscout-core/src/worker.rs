//! One domain visit: fetch, classify, persist, requeue, report.

use chrono::{DateTime, Utc};
use tokio::sync::OwnedSemaphorePermit;

use crate::error::AppError;
use crate::models::{ClaimedTask, Domain, FetchedPage, ResponseState, Tier};
use crate::proxy_pool::LeaseGuard;
use crate::refresh::RefreshPolicy;
use crate::results::{BatchStatus, RecordOutcome, ResultTracker};
use crate::traits::{CallbackNotifier, CallbackPayload, DomainStore, Fetcher, LanguageDetector};
use crate::validation::normalize_languages;
use crate::work_queue::WorkQueue;

/// Scheduler slot held for the length of one visit.
///
/// Error-retry visits also hold a permit from the error-tier budget.
#[derive(Debug)]
pub struct WorkerSlot {
    _global: OwnedSemaphorePermit,
    _error_tier: Option<OwnedSemaphorePermit>,
}

impl WorkerSlot {
    pub fn new(global: OwnedSemaphorePermit, error_tier: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            _global: global,
            _error_tier: error_tier,
        }
    }
}

/// Summary of a finished visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitReport {
    pub domain_id: i64,
    pub host: String,
    pub tier: Tier,
    pub route: String,
    pub state: ResponseState,
    pub error_count: u32,
    pub content_language: String,
    /// Whether the updated domain reached the store.
    pub saved: bool,
    /// When the domain is due again, `None` once it left the queue.
    pub next_due: Option<DateTime<Utc>>,
    /// Batches this visit completed.
    pub completed_batches: Vec<String>,
}

/// Executes domain visits. Cheap to clone; one clone runs per spawned visit.
#[derive(Clone)]
pub struct Worker<F, L, S, N>
where
    F: Fetcher,
    L: LanguageDetector,
    S: DomainStore + WorkQueue,
    N: CallbackNotifier,
{
    fetcher: F,
    detector: L,
    store: S,
    notifier: N,
    tracker: ResultTracker,
    refresh: RefreshPolicy,
}

impl<F, L, S, N> Worker<F, L, S, N>
where
    F: Fetcher,
    L: LanguageDetector,
    S: DomainStore + WorkQueue,
    N: CallbackNotifier,
{
    pub fn new(
        fetcher: F,
        detector: L,
        store: S,
        notifier: N,
        tracker: ResultTracker,
        refresh: RefreshPolicy,
    ) -> Self {
        Self {
            fetcher,
            detector,
            store,
            notifier,
            tracker,
            refresh,
        }
    }

    /// Visit one claimed domain.
    ///
    /// The lease and the slot are released before batch results are reported,
    /// and on every exit path.
    pub async fn visit(&self, task: ClaimedTask, lease: LeaseGuard, slot: WorkerSlot) -> VisitReport {
        let ClaimedTask {
            mut domain,
            tier,
            batch_codes,
        } = task;
        let route = lease
            .lease()
            .map(|l| l.route())
            .unwrap_or_else(|| "none".into());
        let previous_state = domain.response_state;

        let url = domain.target_url();
        let dns_failure = match self.fetcher.fetch(&url, lease.proxy()).await {
            Ok(page) => {
                self.apply_page(&mut domain, page);
                false
            }
            Err(e) => {
                tracing::warn!(domain_id = domain.id, host = %domain.host, %route, error = %e, "Visit failed");
                domain.response_state = ResponseState::Error;
                matches!(e, AppError::DnsError(_))
            }
        };

        domain.error_count = match domain.response_state {
            ResponseState::Error if previous_state == ResponseState::Error => {
                domain.error_count.saturating_add(1)
            }
            ResponseState::Error => 1,
            _ => 0,
        };
        domain.updated_at = Utc::now();

        let now = Utc::now();
        let (saved, next_due) = match self.store.save_domain(&domain).await {
            Ok(()) => {
                let next_due = self.refresh.next_due(&domain, dns_failure, now);
                let queued = match next_due {
                    Some(due_at) => self.store.requeue(domain.id, due_at).await,
                    // A submission during the visit may have queued it again.
                    None => self.store.dequeue(domain.id).await,
                };
                if let Err(e) = queued {
                    tracing::error!(domain_id = domain.id, error = %e, "Failed to update queue entry");
                }
                (true, next_due)
            }
            Err(e) => {
                tracing::error!(domain_id = domain.id, host = %domain.host, error = %e, "Failed to save domain, requeueing");
                if let Err(e) = self.store.requeue(domain.id, now).await {
                    tracing::error!(domain_id = domain.id, error = %e, "Failed to requeue domain");
                }
                (false, Some(now))
            }
        };

        drop(lease);
        drop(slot);

        let completed_batches = if saved {
            let batch_codes = self.linked_batches(domain.id, batch_codes).await;
            self.report_batches(domain.id, &batch_codes).await
        } else {
            Vec::new()
        };

        VisitReport {
            domain_id: domain.id,
            host: domain.host,
            tier,
            route,
            state: domain.response_state,
            error_count: domain.error_count,
            content_language: domain.content_language,
            saved,
            next_due,
            completed_batches,
        }
    }

    /// Apply a fetched page to the domain: status first, then classification.
    fn apply_page(&self, domain: &mut Domain, page: FetchedPage) {
        domain.response_state = ResponseState::from_status(page.status);

        let content = self.detector.detect_content_language(&page.body);
        let tags = self.detector.extract_tag_languages(&page.body);
        match (content, tags) {
            (Ok(content), Ok(mut tags)) => {
                domain.content_language = content.unwrap_or_default();
                tags.extend(page.content_languages);
                domain.tag_languages = normalize_languages(&tags);
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(domain_id = domain.id, host = %domain.host, error = %e, "Language detection failed");
                domain.response_state = ResponseState::Error;
            }
        }
    }

    /// Batch codes captured at claim time plus any batch linked since.
    async fn linked_batches(&self, domain_id: i64, mut codes: Vec<String>) -> Vec<String> {
        match self.store.live_batch_codes(domain_id).await {
            Ok(live) => {
                codes.extend(live);
                codes.sort();
                codes.dedup();
            }
            Err(e) => {
                tracing::warn!(domain_id, error = %e, "Failed to load linked batches");
            }
        }
        codes
    }

    async fn report_batches(&self, domain_id: i64, batch_codes: &[String]) -> Vec<String> {
        let mut completed = Vec::new();
        for code in batch_codes {
            let RecordOutcome::Completed { callback } = self.tracker.record(code, domain_id) else {
                continue;
            };
            tracing::info!(%code, "Batch ready");
            completed.push(code.clone());

            let Some(callback) = callback else {
                continue;
            };
            let domain_ids = match self.tracker.get(code) {
                BatchStatus::Ready(ids) => ids,
                _ => continue,
            };
            let payload = CallbackPayload {
                code: code.clone(),
                domain_ids,
            };
            if let Err(e) = self.notifier.notify(&callback, &payload).await {
                tracing::warn!(%code, %callback, error = %e, "Batch callback failed");
            }
        }
        completed
    }
}
