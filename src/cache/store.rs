//! Bounded in-memory store with lazy TTL expiry and LRU eviction.

use crate::errors::{ResilienceError, ResilienceResult};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// Size statistics for a [`Cache`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently stored, expired-but-unread ones included
    pub size: usize,
    /// Capacity
    pub max_size: usize,
    /// `size / max_size`
    pub utilization: f64,
}

/// Key/value store with optional per-entry TTL and a hard size bound.
///
/// Expired entries read as absent and are removed when their key is next
/// touched. Inserting a new key at capacity evicts the entry that was least
/// recently read or written.
pub struct Cache<V> {
    max_size: NonZeroUsize,
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("max_size", &self.max_size)
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

impl<V: Clone> Cache<V> {
    /// Create a cache holding at most `max_size` entries
    pub fn new(max_size: usize) -> ResilienceResult<Self> {
        let max_size = NonZeroUsize::new(max_size).ok_or_else(|| {
            ResilienceError::configuration("cache max_size must be greater than zero")
        })?;
        Ok(Self {
            max_size,
            entries: Mutex::new(LruCache::new(max_size)),
        })
    }

    /// Value for `key` unless absent or expired
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
        }
        trace!(key = key, "Purging expired cache entry");
        entries.pop(key);
        None
    }

    /// Store `value`; `ttl` of `None` never expires
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
        };
        if let Some((evicted, _)) = self.entries.lock().push(key.to_string(), entry) {
            if evicted != key {
                trace!(key = %evicted, "Evicted least recently used cache entry");
            }
        }
    }

    /// Remove `key`, returning whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// True when `key` holds a live entry. Does not count as an access.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .peek(key)
            .map_or(false, |entry| !entry.is_expired(now))
    }

    /// Age of a live entry. Does not count as an access.
    pub fn age(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .peek(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| now.saturating_duration_since(entry.created_at))
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key.as_str());
        }
        expired.len()
    }

    /// Stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Capacity
    pub fn max_size(&self) -> usize {
        self.max_size.get()
    }

    /// Size statistics
    pub fn stats(&self) -> CacheStats {
        let size = self.len();
        CacheStats {
            size,
            max_size: self.max_size(),
            utilization: size as f64 / self.max_size() as f64,
        }
    }
}
