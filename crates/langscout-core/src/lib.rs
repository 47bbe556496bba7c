pub mod batch;
pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod proxy_pool;
pub mod refresh;
pub mod results;
pub mod scheduler;
pub mod traits;
pub mod validation;
pub mod work_queue;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use batch::{BatchReceipt, submit_batch};
pub use config::CrawlConfig;
pub use error::AppError;
pub use memory::MemoryStore;
pub use models::{ClaimedTask, Domain, Proxy, ResponseState, Tier, batch_code, compute_hash};
pub use proxy_pool::{Lease, LeaseGuard, PoolStats, ProxyPool};
pub use results::{BatchHandle, BatchStatus, RecordOutcome, ResultTracker};
pub use scheduler::{CrawlEvent, CrawlReporter, Scheduler, SchedulerSummary, TracingCrawlReporter};
pub use traits::{
    BatchStore, CallbackNotifier, DomainStore, Fetcher, LanguageDetector, ProxyRegistry,
};
pub use work_queue::WorkQueue;
pub use worker::{VisitReport, Worker};
