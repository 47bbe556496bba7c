//! Bounded lease pool over the registered proxies plus the direct lane.
//!
//! Every proxy and the direct lane carry the same per-route capacity. A lease
//! is the right to run one fetch over one route; it must be given back with
//! [`ProxyPool::release`] or by dropping a [`LeaseGuard`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{Proxy, ProxyScheme};
use crate::traits::ProxyRegistry;

/// Page size used when loading the registry.
const REGISTRY_PAGE_SIZE: usize = 500;

/// Right to use one route for one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    id: u64,
    proxy: Option<Proxy>,
}

impl Lease {
    /// The leased proxy, `None` for the direct lane.
    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn is_direct(&self) -> bool {
        self.proxy.is_none()
    }

    /// Short route label for logs.
    pub fn route(&self) -> String {
        match &self.proxy {
            Some(p) => format!("{}#{}", p.scheme, p.id),
            None => ProxyScheme::NoProxy.to_string(),
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub proxies: usize,
    pub capacity_per_route: usize,
    pub proxy_leases: usize,
    pub direct_leases: usize,
}

impl PoolStats {
    /// Leases that can be handed out when the pool is idle.
    pub fn total_capacity(&self) -> usize {
        (self.proxies + 1) * self.capacity_per_route
    }

    pub fn outstanding(&self) -> usize {
        self.proxy_leases + self.direct_leases
    }
}

#[derive(Debug)]
struct Entry {
    proxy: Proxy,
    leases: usize,
}

#[derive(Debug)]
struct PoolInner {
    entries: Vec<Entry>,
    direct_leases: usize,
    /// Lease id to proxy id (`None` for the direct lane).
    outstanding: HashMap<u64, Option<i64>>,
    /// Leases still held on proxies a refresh dropped, by proxy id.
    retired: HashMap<i64, usize>,
    next_lease_id: u64,
}

/// Thread-safe proxy lease pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProxyPool {
    capacity: usize,
    inner: Arc<Mutex<PoolInner>>,
}

impl ProxyPool {
    /// Create an empty pool; only the direct lane is usable until a refresh.
    pub fn new(capacity_per_route: usize) -> Self {
        Self {
            capacity: capacity_per_route.max(1),
            inner: Arc::new(Mutex::new(PoolInner {
                entries: Vec::new(),
                direct_leases: 0,
                outstanding: HashMap::new(),
                retired: HashMap::new(),
                next_lease_id: 0,
            })),
        }
    }

    pub fn with_proxies(capacity_per_route: usize, proxies: Vec<Proxy>) -> Self {
        let pool = Self::new(capacity_per_route);
        pool.refresh(proxies);
        pool
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy pool mutex");
            poisoned.into_inner()
        })
    }

    /// Lease the first proxy with spare capacity, in registry order.
    ///
    /// Falls back to the direct lane. Returns `None` when every route is
    /// saturated.
    pub fn acquire(&self) -> Option<Lease> {
        let mut inner = self.lock_inner();
        let capacity = self.capacity;

        let leased = inner
            .entries
            .iter_mut()
            .find(|e| e.leases < capacity)
            .map(|entry| {
                entry.leases += 1;
                entry.proxy.clone()
            });
        let proxy = match leased {
            Some(proxy) => Some(proxy),
            None if inner.direct_leases < capacity => {
                inner.direct_leases += 1;
                None
            }
            None => return None,
        };

        let id = inner.next_lease_id;
        inner.next_lease_id += 1;
        inner.outstanding.insert(id, proxy.as_ref().map(|p| p.id));
        Some(Lease { id, proxy })
    }

    /// Lease a route wrapped in a guard that releases it on drop.
    pub fn acquire_guard(&self) -> Option<LeaseGuard> {
        self.acquire().map(|lease| LeaseGuard {
            pool: self.clone(),
            lease: Some(lease),
        })
    }

    /// Give a lease back. Unknown and already released leases are ignored.
    pub fn release(&self, lease: &Lease) {
        let mut inner = self.lock_inner();
        let Some(route) = inner.outstanding.remove(&lease.id) else {
            return;
        };
        match route {
            Some(proxy_id) => {
                if let Some(entry) = inner.entries.iter_mut().find(|e| e.proxy.id == proxy_id) {
                    entry.leases = entry.leases.saturating_sub(1);
                } else if let Some(held) = inner.retired.get_mut(&proxy_id) {
                    *held = held.saturating_sub(1);
                    if *held == 0 {
                        inner.retired.remove(&proxy_id);
                    }
                }
            }
            None => inner.direct_leases = inner.direct_leases.saturating_sub(1),
        }
    }

    /// Replace the proxy list with a registry snapshot.
    ///
    /// Proxies kept across the refresh keep their lease counts. Leases on a
    /// dropped proxy stay counted against it until released, so a proxy that
    /// comes back in a later snapshot never exceeds its capacity.
    pub fn refresh(&self, snapshot: Vec<Proxy>) {
        let mut inner = self.lock_inner();

        let mut previous: HashMap<i64, usize> = inner
            .entries
            .drain(..)
            .map(|e| (e.proxy.id, e.leases))
            .collect();

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(snapshot.len());
        for proxy in snapshot {
            if proxy.scheme == ProxyScheme::NoProxy || !seen.insert(proxy.id) {
                continue;
            }
            let leases = previous
                .remove(&proxy.id)
                .or_else(|| inner.retired.remove(&proxy.id))
                .unwrap_or(0);
            entries.push(Entry { proxy, leases });
        }

        for (&id, &leases) in &previous {
            if leases > 0 {
                inner.retired.insert(id, leases);
            }
        }

        tracing::debug!(
            proxies = entries.len(),
            dropped = previous.len(),
            "Proxy pool refreshed"
        );
        inner.entries = entries;
    }

    /// Reload the pool from the registry. A failed load keeps the old snapshot.
    pub async fn refresh_from<R: ProxyRegistry>(&self, registry: &R) -> Result<usize, AppError> {
        let mut snapshot = Vec::new();
        let mut offset = 0;
        loop {
            let page = registry.list_proxies(REGISTRY_PAGE_SIZE, offset).await?;
            let len = page.len();
            snapshot.extend(page);
            if len < REGISTRY_PAGE_SIZE {
                break;
            }
            offset += len;
        }

        let count = snapshot.len();
        self.refresh(snapshot);
        Ok(count)
    }

    /// Periodically reload the pool until cancelled.
    pub async fn run_refresh<R: ProxyRegistry>(
        &self,
        registry: R,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = cancel.cancelled() => break,
            }
            match self.refresh_from(&registry).await {
                Ok(count) => tracing::info!(proxies = count, "Reloaded proxy registry"),
                Err(e) => {
                    tracing::warn!(error = %e, "Proxy registry reload failed, keeping previous snapshot");
                }
            }
        }
        tracing::debug!("Proxy refresher stopped");
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock_inner();
        PoolStats {
            proxies: inner.entries.len(),
            capacity_per_route: self.capacity,
            proxy_leases: inner.entries.iter().map(|e| e.leases).sum(),
            direct_leases: inner.direct_leases,
        }
    }
}

/// Releases its lease when dropped.
#[derive(Debug)]
pub struct LeaseGuard {
    pool: ProxyPool,
    lease: Option<Lease>,
}

impl LeaseGuard {
    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.lease.as_ref().and_then(Lease::proxy)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.pool.release(&lease);
        }
    }
}
