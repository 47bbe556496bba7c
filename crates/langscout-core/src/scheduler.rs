//! The crawl control loop.
//!
//! Claims work tier by tier, bounds concurrency with a global semaphore,
//! routes every visit through a proxy lease and spawns one [`Worker`] task
//! per visit. Stops on cancellation or after too many consecutive claim
//! failures.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::CrawlConfig;
use crate::error::AppError;
use crate::models::{ClaimedTask, Tier};
use crate::proxy_pool::ProxyPool;
use crate::traits::{CallbackNotifier, DomainStore, Fetcher, LanguageDetector};
use crate::work_queue::WorkQueue;
use crate::worker::{VisitReport, Worker, WorkerSlot};

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum CrawlEvent<'a> {
    Started {
        worker_slots: usize,
        error_tier_slots: usize,
    },
    Claimed {
        task: &'a ClaimedTask,
    },
    Dispatched {
        domain_id: i64,
        tier: Tier,
        route: &'a str,
    },
    LeaseExhausted {
        domain_id: i64,
    },
    ClaimFailed {
        error: &'a AppError,
        consecutive: u32,
    },
    Idle,
    VisitFinished {
        report: &'a VisitReport,
    },
    Stopped {
        summary: &'a SchedulerSummary,
    },
}

impl CrawlEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            CrawlEvent::Started { .. } => "started",
            CrawlEvent::Claimed { .. } => "claimed",
            CrawlEvent::Dispatched { .. } => "dispatched",
            CrawlEvent::LeaseExhausted { .. } => "lease_exhausted",
            CrawlEvent::ClaimFailed { .. } => "claim_failed",
            CrawlEvent::Idle => "idle",
            CrawlEvent::VisitFinished { .. } => "visit_finished",
            CrawlEvent::Stopped { .. } => "stopped",
        }
    }
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait CrawlReporter: Send + Sync {
    fn report(&self, event: CrawlEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCrawlReporter;

impl CrawlReporter for TracingCrawlReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        match event {
            CrawlEvent::Started {
                worker_slots,
                error_tier_slots,
            } => {
                tracing::info!(%worker_slots, %error_tier_slots, "Scheduler started");
            }
            CrawlEvent::Claimed { task } => {
                tracing::debug!(domain_id = task.domain.id, host = %task.domain.host, tier = %task.tier, "Task claimed");
            }
            CrawlEvent::Dispatched {
                domain_id,
                tier,
                route,
            } => {
                tracing::debug!(%domain_id, %tier, %route, "Visit dispatched");
            }
            CrawlEvent::LeaseExhausted { domain_id } => {
                tracing::debug!(%domain_id, "No proxy lease available, task requeued");
            }
            CrawlEvent::ClaimFailed { error, consecutive } => {
                tracing::error!(%error, %consecutive, "Failed to claim work");
            }
            CrawlEvent::Idle => {
                tracing::trace!("No work available");
            }
            CrawlEvent::VisitFinished { report } => {
                tracing::info!(
                    domain_id = report.domain_id,
                    host = %report.host,
                    state = %report.state,
                    error_count = report.error_count,
                    language = %report.content_language,
                    route = %report.route,
                    "Visit finished"
                );
            }
            CrawlEvent::Stopped { summary } => {
                tracing::info!(
                    dispatched = summary.dispatched,
                    lease_exhausted = summary.lease_exhausted,
                    claim_failures = summary.claim_failures,
                    "Scheduler stopped"
                );
            }
        }
    }
}

/// Counters collected over one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub dispatched: u64,
    pub lease_exhausted: u64,
    pub claim_failures: u64,
    pub idle_polls: u64,
}

/// Claims pending visits and runs them on bounded worker slots.
pub struct Scheduler<F, L, S, N>
where
    F: Fetcher,
    L: LanguageDetector,
    S: DomainStore + WorkQueue,
    N: CallbackNotifier,
{
    worker: Worker<F, L, S, N>,
    store: S,
    pool: ProxyPool,
    config: CrawlConfig,
    slots: Arc<Semaphore>,
    error_slots: Arc<Semaphore>,
}

impl<F, L, S, N> Scheduler<F, L, S, N>
where
    F: Fetcher + 'static,
    L: LanguageDetector + 'static,
    S: DomainStore + WorkQueue + 'static,
    N: CallbackNotifier + 'static,
{
    pub fn new(worker: Worker<F, L, S, N>, store: S, pool: ProxyPool, config: CrawlConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.worker_slots()));
        let error_slots = Arc::new(Semaphore::new(config.error_tier_slots()));
        Self {
            worker,
            store,
            pool,
            config,
            slots,
            error_slots,
        }
    }

    /// Worker slots not currently held by a visit.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run the control loop until cancellation.
    ///
    /// In-flight visits always run to completion before this returns.
    pub async fn run<R>(
        &self,
        cancel: CancellationToken,
        reporter: R,
    ) -> Result<SchedulerSummary, AppError>
    where
        R: CrawlReporter + Clone + 'static,
    {
        reporter.report(CrawlEvent::Started {
            worker_slots: self.config.worker_slots(),
            error_tier_slots: self.config.error_tier_slots(),
        });

        let tasks = TaskTracker::new();
        let mut summary = SchedulerSummary::default();
        let mut consecutive_failures: u32 = 0;

        let outcome = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            // Holding an error-tier permit is what allows the error tier at all.
            let error_permit = self.error_slots.clone().try_acquire_owned().ok();

            let task = match self.store.claim_next(error_permit.is_some()).await {
                Ok(Some(task)) => {
                    consecutive_failures = 0;
                    task
                }
                Ok(None) => {
                    consecutive_failures = 0;
                    summary.idle_polls += 1;
                    reporter.report(CrawlEvent::Idle);
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel.cancelled() => break Ok(()),
                    }
                    continue;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    summary.claim_failures += 1;
                    reporter.report(CrawlEvent::ClaimFailed {
                        error: &e,
                        consecutive: consecutive_failures,
                    });
                    if consecutive_failures > self.config.max_consecutive_failures {
                        break Err(AppError::FailureThreshold {
                            failures: consecutive_failures,
                        });
                    }
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel.cancelled() => break Ok(()),
                    }
                    continue;
                }
            };
            reporter.report(CrawlEvent::Claimed { task: &task });

            let error_permit = if task.tier == Tier::ErrorRetry {
                error_permit
            } else {
                None
            };

            let permit = tokio::select! {
                permit = self.slots.clone().acquire_owned() => permit,
                () = cancel.cancelled() => {
                    self.return_task(&task).await;
                    break Ok(());
                }
            };
            let permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    self.return_task(&task).await;
                    break Err(AppError::Generic(format!("worker slots closed: {e}")));
                }
            };

            let Some(lease) = self.pool.acquire_guard() else {
                self.return_task(&task).await;
                drop(permit);
                summary.lease_exhausted += 1;
                reporter.report(CrawlEvent::LeaseExhausted {
                    domain_id: task.domain.id,
                });
                tokio::select! {
                    () = tokio::time::sleep(self.config.lease_backoff) => {}
                    () = cancel.cancelled() => break Ok(()),
                }
                continue;
            };

            let route = lease
                .lease()
                .map(|l| l.route())
                .unwrap_or_default();
            reporter.report(CrawlEvent::Dispatched {
                domain_id: task.domain.id,
                tier: task.tier,
                route: &route,
            });
            summary.dispatched += 1;

            let worker = self.worker.clone();
            let reporter = reporter.clone();
            let slot = WorkerSlot::new(permit, error_permit);
            tasks.spawn(async move {
                let report = worker.visit(task, lease, slot).await;
                reporter.report(CrawlEvent::VisitFinished { report: &report });
            });
        };

        tasks.close();
        tasks.wait().await;
        reporter.report(CrawlEvent::Stopped { summary: &summary });

        outcome.map(|()| summary)
    }

    /// Put a claimed but undispatched task back at the front of its tier.
    async fn return_task(&self, task: &ClaimedTask) {
        if let Err(e) = self.store.requeue(task.domain.id, Utc::now()).await {
            tracing::error!(domain_id = task.domain.id, error = %e, "Failed to return task to queue");
        }
    }
}
