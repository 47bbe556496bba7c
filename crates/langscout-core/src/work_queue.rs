use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::ClaimedTask;

/// Persistent queue of pending domain visits, selected in three tiers.
///
/// Every `claim_*` call must be an atomic select-one-and-delete, so no two
/// claimants can ever receive the same domain. The PostgreSQL implementation
/// uses `FOR UPDATE SKIP LOCKED`.
pub trait WorkQueue: Send + Sync + Clone {
    /// Claim an unvisited domain that backs a live user batch.
    fn claim_user_task(
        &self,
    ) -> impl Future<Output = Result<Option<ClaimedTask>, AppError>> + Send;

    /// Claim a failed or banned domain whose retry time has come.
    fn claim_error_task(
        &self,
    ) -> impl Future<Output = Result<Option<ClaimedTask>, AppError>> + Send;

    /// Claim a never-visited domain with no batch urgency.
    fn claim_list_task(
        &self,
    ) -> impl Future<Output = Result<Option<ClaimedTask>, AppError>> + Send;

    /// Insert a queue entry unless one already exists.
    fn enqueue(
        &self,
        domain_id: i64,
        due_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Insert a queue entry or move an existing one to `due_at`.
    fn requeue(
        &self,
        domain_id: i64,
        due_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn dequeue(&self, domain_id: i64) -> impl Future<Output = Result<(), AppError>> + Send;

    fn pending_count(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Codes of the unexpired batches linked to a domain, sorted.
    fn live_batch_codes(
        &self,
        domain_id: i64,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;

    /// Claim from the highest tier that has eligible work.
    ///
    /// The error tier is skipped when `allow_error_tier` is false.
    fn claim_next(
        &self,
        allow_error_tier: bool,
    ) -> impl Future<Output = Result<Option<ClaimedTask>, AppError>> + Send {
        async move {
            if let Some(task) = self.claim_user_task().await? {
                return Ok(Some(task));
            }
            if allow_error_tier && let Some(task) = self.claim_error_task().await? {
                return Ok(Some(task));
            }
            self.claim_list_task().await
        }
    }
}
