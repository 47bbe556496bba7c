//! User batch submission.

use chrono::Utc;
use serde::Serialize;
use url::Url;

use crate::error::AppError;
use crate::models::{ResponseState, batch_code};
use crate::results::{BatchStatus, RecordOutcome, ResultTracker};
use crate::traits::{BatchStore, CallbackNotifier, CallbackPayload, DomainStore};
use crate::work_queue::WorkQueue;

/// Acknowledgement returned to a submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    pub code: String,
    /// Number of distinct domains in the batch.
    pub expected: usize,
    /// False when the same batch was already live.
    pub created: bool,
}

/// Submit a batch of hosts for priority crawling.
///
/// Domains that already have a terminal verdict count as done right away;
/// the rest are queued for the user tier. Resubmitting a live batch changes
/// nothing and returns the same code.
pub async fn submit_batch<S, B, N>(
    store: &S,
    batches: &B,
    tracker: &ResultTracker,
    notifier: &N,
    hosts: &[String],
    callback: Option<&str>,
) -> Result<BatchReceipt, AppError>
where
    S: DomainStore + WorkQueue,
    B: BatchStore,
    N: CallbackNotifier,
{
    if hosts.is_empty() {
        return Err(AppError::ValidationError("empty host list".into()));
    }
    let callback = callback.map(str::trim).filter(|c| !c.is_empty());
    if let Some(cb) = callback {
        validate_callback(cb)?;
    }

    let code = batch_code(callback, hosts);
    match tracker.get(&code) {
        BatchStatus::NotFound => {}
        BatchStatus::NotReady { expected, .. } => {
            return Ok(BatchReceipt {
                code,
                expected,
                created: false,
            });
        }
        BatchStatus::Ready(ids) => {
            return Ok(BatchReceipt {
                code,
                expected: ids.len(),
                created: false,
            });
        }
    }

    let domains = store.upsert_domains(hosts).await?;
    let ids: Vec<i64> = domains.iter().map(|d| d.id).collect();
    let now = Utc::now();

    batches
        .create_batch_record(&code, &ids, callback, now + tracker.lifetime())
        .await?;
    tracker.create_batch_at(&code, ids.len(), callback.map(str::to_string), now);

    let mut queued = Vec::new();
    for domain in &domains {
        if !domain.response_state.is_terminal() {
            store.requeue(domain.id, now).await?;
            queued.push(domain.id);
        }
    }

    // A visit that finished while the batch was being registered may have
    // missed it, so settled domains are recorded from a fresh read.
    let mut completed_callback = None;
    for domain in store.get_domains(&ids).await? {
        if !domain.response_state.is_terminal() {
            continue;
        }
        // Banned domains keep their retry entry.
        let done = matches!(domain.response_state, ResponseState::Ok | ResponseState::NotFound);
        if done && queued.contains(&domain.id) {
            store.dequeue(domain.id).await?;
        }
        if let RecordOutcome::Completed { callback } = tracker.record(&code, domain.id) {
            completed_callback = Some(callback);
        }
    }

    tracing::info!(%code, expected = ids.len(), "Batch submitted");

    if let Some(Some(cb)) = completed_callback {
        let payload = CallbackPayload {
            code: code.clone(),
            domain_ids: ids.clone(),
        };
        if let Err(e) = notifier.notify(&cb, &payload).await {
            tracing::warn!(%code, callback = %cb, error = %e, "Batch callback failed");
        }
    }

    Ok(BatchReceipt {
        code,
        expected: ids.len(),
        created: true,
    })
}

fn validate_callback(callback: &str) -> Result<(), AppError> {
    let url = Url::parse(callback)
        .map_err(|e| AppError::ValidationError(format!("invalid callback '{callback}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::ValidationError(format!(
            "callback '{callback}' must use http or https"
        )));
    }
    Ok(())
}
