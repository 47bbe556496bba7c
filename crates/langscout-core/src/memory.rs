//! In-process store implementing every persistence trait.
//!
//! Used by tests and by the CLI `probe` command. One mutex guards all
//! tables, so each claim is an atomic select-and-remove.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{BatchLookup, ClaimedTask, Domain, NewProxy, Proxy, ResponseState, Tier};
use crate::traits::{BatchStore, DomainStore, ProxyRegistry};
use crate::validation::{normalize_host, prepare_domain, validate_proxy};
use crate::work_queue::WorkQueue;

#[derive(Debug)]
struct BatchRecord {
    domain_ids: Vec<i64>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    domains: BTreeMap<i64, Domain>,
    hosts: HashMap<String, i64>,
    next_domain_id: i64,
    queue: HashMap<i64, DateTime<Utc>>,
    batches: HashMap<String, BatchRecord>,
    proxies: BTreeMap<i64, Proxy>,
    next_proxy_id: i64,
}

impl Tables {
    fn live_batch_codes(&self, domain_id: i64, now: DateTime<Utc>) -> Vec<String> {
        let mut codes: Vec<String> = self
            .batches
            .iter()
            .filter(|(_, b)| b.expires_at > now && b.domain_ids.contains(&domain_id))
            .map(|(code, _)| code.clone())
            .collect();
        codes.sort();
        codes
    }

    /// Remove and return the earliest eligible entry for a tier.
    fn claim(&mut self, tier: Tier, now: DateTime<Utc>) -> Option<ClaimedTask> {
        let (domain_id, _) = self
            .queue
            .iter()
            .filter(|&(&id, &due_at)| {
                let Some(domain) = self.domains.get(&id) else {
                    return false;
                };
                let state = domain.response_state;
                match tier {
                    Tier::User => {
                        state == ResponseState::Unvisited
                            && !self.live_batch_codes(id, now).is_empty()
                    }
                    Tier::ErrorRetry => {
                        matches!(state, ResponseState::Error | ResponseState::Banned)
                            && due_at <= now
                    }
                    Tier::ListScan => {
                        state == ResponseState::Unvisited
                            && due_at <= now
                            && self.live_batch_codes(id, now).is_empty()
                    }
                }
            })
            .map(|(&id, &due_at)| (id, due_at))
            .min_by_key(|&(id, due_at)| (due_at, id))?;

        self.queue.remove(&domain_id);
        let domain = self.domains.get(&domain_id)?.clone();
        Some(ClaimedTask {
            batch_codes: self.live_batch_codes(domain_id, now),
            domain,
            tier,
        })
    }
}

/// Thread-safe in-memory store. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned memory store mutex");
            poisoned.into_inner()
        })
    }

    fn claim(&self, tier: Tier) -> Option<ClaimedTask> {
        self.lock_tables().claim(tier, Utc::now())
    }

    /// Due time of a queued domain, `None` if it is not queued.
    pub fn due_at(&self, domain_id: i64) -> Option<DateTime<Utc>> {
        self.lock_tables().queue.get(&domain_id).copied()
    }
}

impl DomainStore for MemoryStore {
    async fn upsert_domains(&self, hosts: &[String]) -> Result<Vec<Domain>, AppError> {
        let normalized = hosts
            .iter()
            .map(|h| normalize_host(h))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = self.lock_tables();
        let mut result: Vec<Domain> = Vec::with_capacity(normalized.len());
        for host in normalized {
            let id = match tables.hosts.get(&host) {
                Some(&id) => id,
                None => {
                    tables.next_domain_id += 1;
                    let id = tables.next_domain_id;
                    tables.hosts.insert(host.clone(), id);
                    tables.domains.insert(id, Domain::new(id, host));
                    id
                }
            };
            if result.iter().any(|d| d.id == id) {
                continue;
            }
            if let Some(domain) = tables.domains.get(&id) {
                result.push(domain.clone());
            }
        }
        Ok(result)
    }

    async fn save_domain(&self, domain: &Domain) -> Result<(), AppError> {
        let mut domain = domain.clone();
        prepare_domain(&mut domain)?;

        let mut tables = self.lock_tables();
        let stored = tables
            .domains
            .get_mut(&domain.id)
            .ok_or_else(|| AppError::DatabaseError(format!("domain {} not found", domain.id)))?;
        stored.response_state = domain.response_state;
        stored.error_count = domain.error_count;
        stored.content_language = domain.content_language;
        stored.tag_languages = domain.tag_languages;
        stored.sitemap_languages = domain.sitemap_languages;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn get_domain(&self, id: i64) -> Result<Option<Domain>, AppError> {
        Ok(self.lock_tables().domains.get(&id).cloned())
    }

    async fn get_domains(&self, ids: &[i64]) -> Result<Vec<Domain>, AppError> {
        let tables = self.lock_tables();
        Ok(ids
            .iter()
            .filter_map(|id| tables.domains.get(id).cloned())
            .collect())
    }

    async fn list_domains(&self, limit: usize, offset: usize) -> Result<Vec<Domain>, AppError> {
        let tables = self.lock_tables();
        Ok(tables
            .domains
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_domain(&self, id: i64) -> Result<bool, AppError> {
        let mut tables = self.lock_tables();
        let Some(domain) = tables.domains.remove(&id) else {
            return Ok(false);
        };
        tables.hosts.remove(&domain.host);
        tables.queue.remove(&id);
        for batch in tables.batches.values_mut() {
            batch.domain_ids.retain(|&d| d != id);
        }
        Ok(true)
    }
}

impl WorkQueue for MemoryStore {
    async fn claim_user_task(&self) -> Result<Option<ClaimedTask>, AppError> {
        Ok(self.claim(Tier::User))
    }

    async fn claim_error_task(&self) -> Result<Option<ClaimedTask>, AppError> {
        Ok(self.claim(Tier::ErrorRetry))
    }

    async fn claim_list_task(&self) -> Result<Option<ClaimedTask>, AppError> {
        Ok(self.claim(Tier::ListScan))
    }

    async fn enqueue(&self, domain_id: i64, due_at: DateTime<Utc>) -> Result<(), AppError> {
        let mut tables = self.lock_tables();
        if !tables.domains.contains_key(&domain_id) {
            return Err(AppError::DatabaseError(format!(
                "domain {domain_id} not found"
            )));
        }
        tables.queue.entry(domain_id).or_insert(due_at);
        Ok(())
    }

    async fn requeue(&self, domain_id: i64, due_at: DateTime<Utc>) -> Result<(), AppError> {
        let mut tables = self.lock_tables();
        if !tables.domains.contains_key(&domain_id) {
            return Err(AppError::DatabaseError(format!(
                "domain {domain_id} not found"
            )));
        }
        tables.queue.insert(domain_id, due_at);
        Ok(())
    }

    async fn dequeue(&self, domain_id: i64) -> Result<(), AppError> {
        self.lock_tables().queue.remove(&domain_id);
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, AppError> {
        Ok(self.lock_tables().queue.len() as u64)
    }

    async fn live_batch_codes(&self, domain_id: i64) -> Result<Vec<String>, AppError> {
        Ok(self.lock_tables().live_batch_codes(domain_id, Utc::now()))
    }
}

impl BatchStore for MemoryStore {
    async fn create_batch_record(
        &self,
        code: &str,
        domain_ids: &[i64],
        _callback: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tables = self.lock_tables();
        let now = Utc::now();
        if tables
            .batches
            .get(code)
            .is_some_and(|b| b.expires_at > now)
        {
            return Ok(());
        }
        let mut ids = domain_ids.to_vec();
        ids.dedup();
        tables.batches.insert(
            code.to_string(),
            BatchRecord {
                domain_ids: ids,
                created_at: now,
                expires_at,
            },
        );
        Ok(())
    }

    async fn lookup_batch(&self, code: &str) -> Result<BatchLookup, AppError> {
        let tables = self.lock_tables();
        let now = Utc::now();
        let Some(batch) = tables.batches.get(code).filter(|b| b.expires_at > now) else {
            return Ok(BatchLookup::NotFound);
        };

        let domains: Vec<Domain> = batch
            .domain_ids
            .iter()
            .filter_map(|id| tables.domains.get(id).cloned())
            .collect();
        let done = domains.iter().all(|d| d.is_settled_since(batch.created_at));
        Ok(if done {
            BatchLookup::Ready(domains)
        } else {
            BatchLookup::NotReady
        })
    }
}

impl ProxyRegistry for MemoryStore {
    async fn list_proxies(&self, limit: usize, offset: usize) -> Result<Vec<Proxy>, AppError> {
        let tables = self.lock_tables();
        let limit = if limit == 0 { usize::MAX } else { limit };
        Ok(tables
            .proxies
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn add_proxies(&self, proxies: &[NewProxy]) -> Result<u64, AppError> {
        for proxy in proxies {
            validate_proxy(proxy)?;
        }
        let mut tables = self.lock_tables();
        for proxy in proxies {
            tables.next_proxy_id += 1;
            let id = tables.next_proxy_id;
            tables.proxies.insert(
                id,
                Proxy {
                    id,
                    endpoint: proxy.endpoint.clone(),
                    scheme: proxy.scheme,
                    credentials: proxy.credentials.clone(),
                },
            );
        }
        Ok(proxies.len() as u64)
    }

    async fn delete_proxy(&self, id: i64) -> Result<bool, AppError> {
        Ok(self.lock_tables().proxies.remove(&id).is_some())
    }
}
