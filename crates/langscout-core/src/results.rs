//! In-memory aggregation of user batches.
//!
//! Workers report finished domains, the API polls for readiness, and a
//! sweeper drops batches once they expire. All three go through one mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// A registered batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchHandle {
    pub code: String,
    pub expected: usize,
    pub callback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Readiness of a batch as seen by a poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    NotFound,
    NotReady { collected: usize, expected: usize },
    Ready(Vec<i64>),
}

/// What a [`ResultTracker::record`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Unknown or expired code, duplicate id, or a batch already full.
    Ignored,
    Recorded,
    /// This report made the batch ready. Returned once per batch.
    Completed { callback: Option<String> },
}

#[derive(Debug)]
struct Entry {
    handle: BatchHandle,
    collected: Vec<i64>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.handle.expires_at > now
    }
}

/// Thread-safe batch tracker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ResultTracker {
    lifetime: TimeDelta,
    batches: Arc<Mutex<HashMap<String, Entry>>>,
}

impl ResultTracker {
    pub fn new(lifetime: TimeDelta) -> Self {
        Self {
            lifetime,
            batches: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// How long a batch stays live after creation.
    pub fn lifetime(&self) -> TimeDelta {
        self.lifetime
    }

    fn lock_batches(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.batches.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned result tracker mutex");
            poisoned.into_inner()
        })
    }

    /// Register a batch. A code that is already live keeps its existing handle.
    pub fn create_batch(
        &self,
        code: &str,
        expected: usize,
        callback: Option<String>,
    ) -> BatchHandle {
        self.create_batch_at(code, expected, callback, Utc::now())
    }

    pub fn create_batch_at(
        &self,
        code: &str,
        expected: usize,
        callback: Option<String>,
        now: DateTime<Utc>,
    ) -> BatchHandle {
        let mut batches = self.lock_batches();
        if let Some(entry) = batches.get(code)
            && entry.is_live(now)
        {
            return entry.handle.clone();
        }

        let handle = BatchHandle {
            code: code.to_string(),
            expected,
            callback,
            created_at: now,
            expires_at: now + self.lifetime,
        };
        batches.insert(
            code.to_string(),
            Entry {
                handle: handle.clone(),
                collected: Vec::with_capacity(expected),
            },
        );
        handle
    }

    /// Record one finished domain for a batch.
    pub fn record(&self, code: &str, domain_id: i64) -> RecordOutcome {
        self.record_at(code, domain_id, Utc::now())
    }

    pub fn record_at(&self, code: &str, domain_id: i64, now: DateTime<Utc>) -> RecordOutcome {
        let mut batches = self.lock_batches();
        let Some(entry) = batches.get_mut(code) else {
            return RecordOutcome::Ignored;
        };
        if !entry.is_live(now)
            || entry.collected.len() >= entry.handle.expected
            || entry.collected.contains(&domain_id)
        {
            return RecordOutcome::Ignored;
        }

        entry.collected.push(domain_id);
        if entry.collected.len() == entry.handle.expected {
            RecordOutcome::Completed {
                callback: entry.handle.callback.clone(),
            }
        } else {
            RecordOutcome::Recorded
        }
    }

    pub fn get(&self, code: &str) -> BatchStatus {
        self.get_at(code, Utc::now())
    }

    pub fn get_at(&self, code: &str, now: DateTime<Utc>) -> BatchStatus {
        let batches = self.lock_batches();
        match batches.get(code) {
            Some(entry) if entry.is_live(now) => {
                if entry.collected.len() >= entry.handle.expected {
                    BatchStatus::Ready(entry.collected.clone())
                } else {
                    BatchStatus::NotReady {
                        collected: entry.collected.len(),
                        expected: entry.handle.expected,
                    }
                }
            }
            _ => BatchStatus::NotFound,
        }
    }

    /// Remove every batch with `expires_at <= now`. Returns how many went.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut batches = self.lock_batches();
        let before = batches.len();
        batches.retain(|_, entry| entry.is_live(now));
        before - batches.len()
    }

    /// Sweep every `interval` until cancelled.
    pub async fn run_sweeper(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = cancel.cancelled() => break,
            }
            let removed = self.sweep(Utc::now());
            if removed > 0 {
                tracing::info!(removed, "Swept expired batches");
            }
        }
        tracing::debug!("Batch sweeper stopped");
    }

    pub fn len(&self) -> usize {
        self.lock_batches().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
