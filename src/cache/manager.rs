//! Cache front end with hit/miss accounting and miss coalescing.

use super::store::{Cache, CacheStats};
use super::CacheConfig;
use crate::errors::{ResilienceError, ResilienceResult};
use crate::observability::ResilienceObserver;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

type PendingCompute<V> = Shared<BoxFuture<'static, ResilienceResult<V>>>;

/// Counters reported by [`CacheManager::stats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheManagerStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that started a computation
    pub misses: u64,
    /// Lookups that joined a computation already in flight
    pub coalesced: u64,
    /// `hits / (hits + misses)`, 0 when nothing was looked up
    pub hit_rate: f64,
    /// Storage backend name
    pub backend: &'static str,
    /// Store occupancy
    pub store: CacheStats,
}

struct ManagerInner<V> {
    cache: Cache<V>,
    default_ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    in_flight: Mutex<HashMap<String, PendingCompute<V>>>,
}

/// In-flight slot for one key, released when the computation ends or is
/// torn down
struct Registration<V> {
    inner: Arc<ManagerInner<V>>,
    key: String,
}

impl<V> Drop for Registration<V> {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.key);
    }
}

/// Cache with a compute-on-miss entry point.
///
/// Concurrent misses for one key share a single computation: the first
/// caller starts it on its own task, later callers await the same result.
/// Callers that are dropped while waiting only detach themselves; the
/// computation runs to completion and fills the cache either way.
/// Failed computations are handed to every waiter and never stored.
pub struct CacheManager<V> {
    inner: Arc<ManagerInner<V>>,
    observer: Option<Arc<dyn ResilienceObserver>>,
}

impl<V> Clone for CacheManager<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            observer: self.observer.clone(),
        }
    }
}

impl<V> std::fmt::Debug for CacheManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("default_ttl", &self.inner.default_ttl)
            .field("hits", &self.inner.hits.load(Ordering::Relaxed))
            .field("misses", &self.inner.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a manager over a fresh in-memory store
    pub fn new(config: CacheConfig) -> ResilienceResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                cache: Cache::new(config.max_size)?,
                default_ttl: config.default_ttl,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                in_flight: Mutex::new(HashMap::new()),
            }),
            observer: None,
        })
    }

    /// Report hits and misses to an observer
    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Return the cached value for `key`, or run `compute` and store its
    /// result for `ttl` (the configured default when `None`).
    ///
    /// `compute` is invoked at most once per miss, no matter how many callers
    /// ask for the same key while it runs. The future it returns is driven by
    /// a spawned task, so this must be called from within a Tokio runtime.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> ResilienceResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<V>> + Send + 'static,
    {
        let (pending, leader) = {
            let mut in_flight = self.inner.in_flight.lock();

            // Checked under the in-flight lock so a computation finishing
            // between the two lookups cannot be missed
            if let Some(value) = self.inner.cache.get(key) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(observer) = &self.observer {
                    observer.on_cache_hit(key);
                }
                return Ok(value);
            }

            if let Some(pending) = in_flight.get(key) {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Joining in-flight computation");
                (pending.clone(), None)
            } else {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                if let Some(observer) = &self.observer {
                    observer.on_cache_miss(key);
                }
                let (tx, rx) = oneshot::channel();
                let pending = rx
                    .map(|received| {
                        received.unwrap_or_else(|_| {
                            Err(ResilienceError::Internal {
                                message: "cache computation ended without a result".to_string(),
                            })
                        })
                    })
                    .boxed()
                    .shared();
                in_flight.insert(key.to_string(), pending.clone());
                (pending, Some(tx))
            }
        };

        if let Some(tx) = leader {
            let registration = Registration {
                inner: Arc::clone(&self.inner),
                key: key.to_string(),
            };
            // Outside the lock: `compute` may be arbitrary caller code
            let fut = compute();
            Self::spawn_compute(registration, ttl, fut, tx);
        }

        pending.await
    }

    fn spawn_compute<Fut>(
        registration: Registration<V>,
        ttl: Option<Duration>,
        fut: Fut,
        tx: oneshot::Sender<ResilienceResult<V>>,
    ) where
        Fut: Future<Output = ResilienceResult<V>> + Send + 'static,
    {
        tokio::spawn(async move {
            let result = fut.await;
            let inner = &registration.inner;
            match &result {
                Ok(value) => {
                    inner
                        .cache
                        .set(&registration.key, value.clone(), ttl.or(inner.default_ttl));
                }
                Err(e) => {
                    debug!(key = %registration.key, error = %e, "Computation failed, nothing cached");
                }
            }
            // Nobody may be listening any more
            let _ = tx.send(result);
            drop(registration);
        });
    }

    /// Cached value for `key` without computing. Not counted in statistics.
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.cache.get(key)
    }

    /// Store a value directly
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.inner
            .cache
            .set(key, value, ttl.or(self.inner.default_ttl));
    }

    /// Remove `key`, returning whether it was cached
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.cache.delete(key)
    }

    /// Drop every entry and zero the statistics
    pub fn clear(&self) {
        self.inner.cache.clear();
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
        self.inner.coalesced.store(0, Ordering::Relaxed);
    }

    /// `hits / (hits + misses)`
    pub fn hit_rate(&self) -> f64 {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheManagerStats {
        CacheManagerStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            backend: "memory",
            store: self.inner.cache.stats(),
        }
    }

    /// Number of computations currently running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Deterministic cache key: SHA-256 hex of the newline-joined parts
    pub fn generate_key(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update(b"\n");
            }
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}
