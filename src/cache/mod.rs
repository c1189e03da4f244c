//! Response caching.
//!
//! [`Cache`] is the bounded TTL/LRU store; [`CacheManager`] sits in front of
//! it, counts hits and misses and coalesces concurrent misses for one key.

mod manager;
mod store;

pub use manager::{CacheManager, CacheManagerStats};
pub use store::{Cache, CacheStats};

use crate::config::duration_secs;
use crate::errors::{ResilienceError, ResilienceResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache sizing and expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub max_size: usize,
    /// TTL applied when a caller does not pass one; `None` never expires
    #[serde(with = "duration_secs::option")]
    pub default_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Some(Duration::from_secs(300)),
        }
    }
}

impl CacheConfig {
    /// Set the capacity
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the default TTL
    pub fn default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Reject a zero capacity
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.max_size == 0 {
            return Err(ResilienceError::configuration(
                "cache max_size must be greater than zero",
            ));
        }
        Ok(())
    }
}
