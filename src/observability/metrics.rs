//! Metrics collection.
//!
//! A small collector abstraction (counters, histograms, gauges with labels)
//! that [`MetricsObserver`](super::MetricsObserver) feeds. Exporters are left
//! to the application.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for resilience metrics.
pub trait MetricsCollector: Send + Sync {
    /// Increments a counter by the given value.
    fn increment_counter(&self, name: &str, value: u64, labels: &[(&str, &str)]);

    /// Records a value in a histogram.
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Sets a gauge to the given value.
    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Collector that keeps everything in memory.
///
/// Series are keyed as `name` or `name:k1=v1,k2=v2` in label order.
///
/// ```
/// use integrations_http_resilience::observability::{InMemoryMetricsCollector, MetricsCollector};
///
/// let collector = InMemoryMetricsCollector::new();
/// collector.increment_counter("requests", 2, &[("outcome", "success")]);
/// assert_eq!(collector.get_counter("requests:outcome=success"), 2);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMetricsCollector {
    counters: RwLock<HashMap<String, AtomicU64>>,
    histograms: RwLock<HashMap<String, Vec<f64>>>,
    gauges: RwLock<HashMap<String, f64>>,
}

impl InMemoryMetricsCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter value, 0 if never incremented.
    pub fn get_counter(&self, key: &str) -> u64 {
        self.counters
            .read()
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Every value recorded for a histogram.
    pub fn get_histogram(&self, key: &str) -> Vec<f64> {
        self.histograms
            .read()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Last value set for a gauge.
    pub fn get_gauge(&self, key: &str) -> Option<f64> {
        self.gauges.read().get(key).copied()
    }

    /// Sum of a counter across all of its label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        let prefix = format!("{name}:");
        self.counters
            .read()
            .iter()
            .filter(|(key, _)| key.as_str() == name || key.starts_with(&prefix))
            .map(|(_, c)| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Drops every series.
    pub fn reset(&self) {
        self.counters.write().clear();
        self.histograms.write().clear();
        self.gauges.write().clear();
    }

    fn make_key(name: &str, labels: &[(&str, &str)]) -> String {
        if labels.is_empty() {
            name.to_string()
        } else {
            let label_str: Vec<String> = labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            format!("{}:{}", name, label_str.join(","))
        }
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn increment_counter(&self, name: &str, value: u64, labels: &[(&str, &str)]) {
        let key = Self::make_key(name, labels);
        if let Some(counter) = self.counters.read().get(&key) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = Self::make_key(name, labels);
        self.histograms.write().entry(key).or_default().push(value);
    }

    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = Self::make_key(name, labels);
        self.gauges.write().insert(key, value);
    }
}

/// Collector that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn increment_counter(&self, _name: &str, _value: u64, _labels: &[(&str, &str)]) {}
    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
    fn set_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

/// Metric names emitted by [`MetricsObserver`](super::MetricsObserver).
pub mod metric_names {
    /// Completed logical requests, labelled by `outcome`
    pub const REQUEST_COUNT: &str = "http_resilience.requests.total";

    /// End-to-end request duration in milliseconds
    pub const REQUEST_DURATION_MS: &str = "http_resilience.requests.duration_ms";

    /// Failed logical requests, labelled by error `class`
    pub const REQUEST_ERRORS: &str = "http_resilience.requests.errors";

    /// Logical requests currently in flight
    pub const ACTIVE_REQUESTS: &str = "http_resilience.requests.active";

    /// Requests denied by the rate limiter
    pub const RATE_LIMIT_DENIED: &str = "http_resilience.rate_limit.denied";

    /// Circuit breaker state per endpoint (0=closed, 1=open, 2=half-open)
    pub const CIRCUIT_BREAKER_STATE: &str = "http_resilience.circuit_breaker.state";

    /// Circuit breaker transitions, labelled by `to`
    pub const CIRCUIT_BREAKER_TRANSITIONS: &str = "http_resilience.circuit_breaker.transitions";

    /// Retries scheduled
    pub const RETRY_ATTEMPTS: &str = "http_resilience.retry.attempts";

    /// Backoff delay before each retry in milliseconds
    pub const RETRY_DELAY_MS: &str = "http_resilience.retry.delay_ms";

    /// Cache lookups answered from the cache
    pub const CACHE_HITS: &str = "http_resilience.cache.hits";

    /// Cache lookups that started a computation
    pub const CACHE_MISSES: &str = "http_resilience.cache.misses";
}
