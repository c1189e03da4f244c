//! Composition of cache, rate limiter, circuit breaker and retry around one
//! logical request.

use crate::cache::{CacheManager, CacheManagerStats};
use crate::config::ResilienceConfig;
use crate::errors::ResilienceResult;
use crate::observability::{NoopObserver, RequestOutcome, ResilienceObserver};
use crate::resilience::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerStats};
use crate::resilience::rate_limiter::RateLimiter;
use crate::resilience::retry::{RetryConfig, RetryExecutor, RetryHook};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Keys one request is tracked under.
#[derive(Debug, Clone, Copy)]
pub struct RequestKeys<'a> {
    /// Circuit breaker key, usually the remote host
    pub endpoint: &'a str,
    /// Rate limit bucket
    pub rate_limit: &'a str,
    /// Cache key; `None` bypasses the cache
    pub cache: Option<&'a str>,
}

impl<'a> RequestKeys<'a> {
    /// Use `endpoint` for both the breaker and the rate limit bucket
    pub fn new(endpoint: &'a str) -> Self {
        Self {
            endpoint,
            rate_limit: endpoint,
            cache: None,
        }
    }

    /// Rate limit under a different key than the breaker
    pub fn rate_limit(mut self, key: &'a str) -> Self {
        self.rate_limit = key;
        self
    }

    /// Cache the result under `key`
    pub fn cache(mut self, key: Option<&'a str>) -> Self {
        self.cache = key;
        self
    }
}

/// Snapshot returned by [`RequestOrchestrator::stats`]
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    /// Cache counters, absent when caching is disabled
    pub cache: Option<CacheManagerStats>,
    /// Every circuit breaker, ordered by endpoint
    pub circuit_breakers: BTreeMap<String, CircuitBreakerStats>,
    /// Rate limit buckets created so far
    pub rate_limit_keys: usize,
    /// Logical requests in flight when the snapshot was taken
    pub active_requests: u64,
}

/// Counts one logical request as active until dropped.
struct ActiveRequest<'a> {
    active: &'a AtomicU64,
    observer: &'a dyn ResilienceObserver,
}

impl<'a> ActiveRequest<'a> {
    fn enter(active: &'a AtomicU64, observer: &'a dyn ResilienceObserver) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        observer.on_active_requests(now);
        Self { active, observer }
    }
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        let previous = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        self.observer.on_active_requests(previous.saturating_sub(1));
    }
}

/// Runs operations through the configured resilience layers.
///
/// Order for one logical request: cache lookup, rate limit admission, circuit
/// breaker, then the retry loop. The breaker sees one outcome per logical
/// request, not one per attempt. Rate limit denials and open circuits are
/// returned without retrying.
pub struct RequestOrchestrator<V> {
    config: ResilienceConfig,
    rate_limiter: Option<Arc<RateLimiter>>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    retry: Arc<RetryExecutor>,
    cache: Option<CacheManager<V>>,
    observer: Arc<dyn ResilienceObserver>,
    active: AtomicU64,
}

impl<V> RequestOrchestrator<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an orchestrator from a validated configuration
    pub fn new(config: ResilienceConfig) -> ResilienceResult<Self> {
        RequestOrchestratorBuilder::new().config(config).build()
    }

    /// Create a builder for configuring the orchestrator
    pub fn builder() -> RequestOrchestratorBuilder {
        RequestOrchestratorBuilder::new()
    }

    /// Every layer disabled; operations run once
    pub fn passthrough() -> Self {
        let config = ResilienceConfig::passthrough();
        Self {
            retry: Arc::new(RetryExecutor::single_attempt()),
            config,
            rate_limiter: None,
            breakers: None,
            cache: None,
            observer: Arc::new(NoopObserver),
            active: AtomicU64::new(0),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Rate limiter, when enabled
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    /// Circuit breaker registry, when enabled
    pub fn circuit_breakers(&self) -> Option<&Arc<CircuitBreakerRegistry>> {
        self.breakers.as_ref()
    }

    /// Response cache, when enabled
    pub fn cache(&self) -> Option<&CacheManager<V>> {
        self.cache.as_ref()
    }

    /// Logical requests currently in flight, cache hits included
    pub fn active_requests(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Run `operation` for `endpoint_key`, optionally through the cache.
    ///
    /// `operation` is called once per attempt.
    pub async fn execute<F, Fut>(
        &self,
        endpoint_key: &str,
        cache_key: Option<&str>,
        operation: F,
    ) -> ResilienceResult<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<V>> + Send + 'static,
    {
        self.execute_keyed(
            RequestKeys::new(endpoint_key).cache(cache_key),
            operation,
            |_| None,
        )
        .await
    }

    /// Like [`execute`](Self::execute) with separate keys per layer.
    /// `status_of` extracts the status reported in the completion event.
    pub async fn execute_keyed<F, Fut, S>(
        &self,
        keys: RequestKeys<'_>,
        operation: F,
        status_of: S,
    ) -> ResilienceResult<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<V>> + Send + 'static,
        S: Fn(&V) -> Option<u16>,
    {
        let started = Instant::now();
        let _active = ActiveRequest::enter(&self.active, self.observer.as_ref());
        let pipeline = self.pipeline(keys.endpoint, keys.rate_limit, operation);

        let result = match (&self.cache, keys.cache) {
            (Some(cache), Some(cache_key)) => {
                cache.get_or_compute(cache_key, None, move || pipeline).await
            }
            _ => pipeline.await,
        };

        let outcome = match &result {
            Ok(value) => RequestOutcome::Success {
                status: status_of(value),
            },
            Err(e) => RequestOutcome::Failure {
                class: e.error_class(),
            },
        };
        debug!(
            endpoint = keys.endpoint,
            outcome = outcome.label(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Request complete"
        );
        self.observer
            .on_request_complete(started.elapsed(), &outcome);
        result
    }

    /// Everything below the cache, as an owned future
    fn pipeline<F, Fut>(
        &self,
        endpoint_key: &str,
        rate_limit_key: &str,
        operation: F,
    ) -> impl Future<Output = ResilienceResult<V>> + Send + 'static
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<V>> + Send + 'static,
    {
        let rate_limiter = self.rate_limiter.clone();
        let breakers = self.breakers.clone();
        let retry = Arc::clone(&self.retry);
        let endpoint_key = endpoint_key.to_string();
        let rate_limit_key = rate_limit_key.to_string();

        async move {
            if let Some(limiter) = &rate_limiter {
                limiter.acquire(&rate_limit_key)?;
            }

            let attempts = || retry.execute(&endpoint_key, &operation);
            match &breakers {
                Some(breakers) => breakers.call(&endpoint_key, attempts).await,
                None => attempts().await,
            }
        }
    }

    /// Snapshot of every layer
    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            cache: self.cache.as_ref().map(CacheManager::stats),
            circuit_breakers: self
                .breakers
                .as_ref()
                .map(|b| b.all_stats())
                .unwrap_or_default(),
            rate_limit_keys: self.rate_limiter.as_ref().map_or(0, |l| l.key_count()),
            active_requests: self.active_requests(),
        }
    }
}

/// Builder for [`RequestOrchestrator`]
#[derive(Default)]
pub struct RequestOrchestratorBuilder {
    config: ResilienceConfig,
    observer: Option<Arc<dyn ResilienceObserver>>,
    retry_hook: Option<Arc<dyn RetryHook>>,
}

impl RequestOrchestratorBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the full configuration
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an observer to every layer
    pub fn observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Consult `hook` before each retry
    pub fn retry_hook(mut self, hook: Arc<dyn RetryHook>) -> Self {
        self.retry_hook = Some(hook);
        self
    }

    /// Validate the configuration and build the orchestrator
    pub fn build<V>(self) -> ResilienceResult<RequestOrchestrator<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        let config = self.config;
        config.validate()?;
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(NoopObserver));

        let rate_limiter = if config.enable_rate_limiting {
            Some(Arc::new(
                RateLimiter::new(config.rate_limit.clone())?.with_observer(Arc::clone(&observer)),
            ))
        } else {
            None
        };

        let breakers = if config.enable_circuit_breaker {
            Some(Arc::new(
                CircuitBreakerRegistry::new(config.circuit_breaker.clone())?
                    .with_observer(Arc::clone(&observer)),
            ))
        } else {
            None
        };

        let retry_config = if config.enable_retry {
            config.retry.clone()
        } else {
            RetryConfig {
                attempt_timeout: config.retry.attempt_timeout,
                ..RetryConfig::disabled()
            }
        };
        let mut retry = RetryExecutor::new(retry_config)?.with_observer(Arc::clone(&observer));
        if let Some(hook) = self.retry_hook {
            retry = retry.with_hook(hook);
        }

        let cache = if config.enable_caching {
            Some(CacheManager::new(config.cache.clone())?.with_observer(Arc::clone(&observer)))
        } else {
            None
        };

        Ok(RequestOrchestrator {
            config,
            rate_limiter,
            breakers,
            retry: Arc::new(retry),
            cache,
            observer,
            active: AtomicU64::new(0),
        })
    }
}
