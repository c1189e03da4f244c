//! Hooks fired by the resilience components.

use super::metrics::{metric_names, MetricsCollector};
use crate::resilience::CircuitState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// How a logical request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The operation produced a value
    Success {
        /// HTTP status, when the value was a response
        status: Option<u16>,
    },
    /// The operation failed or was refused
    Failure {
        /// Stable error class, see `ResilienceError::error_class`
        class: &'static str,
    },
}

impl RequestOutcome {
    /// Label value used in metrics
    pub fn label(&self) -> &'static str {
        match self {
            RequestOutcome::Success { .. } => "success",
            RequestOutcome::Failure { .. } => "failure",
        }
    }
}

/// Observer of resilience events.
///
/// Every method has an empty default, so implementors pick the events they
/// care about. Methods are called synchronously on the request path and must
/// not block.
pub trait ResilienceObserver: Send + Sync {
    /// The rate limiter denied `key`
    fn on_admission_denied(&self, _key: &str, _retry_after: Duration) {}

    /// A circuit breaker changed state
    fn on_circuit_state_change(&self, _key: &str, _from: CircuitState, _to: CircuitState) {}

    /// A cache lookup was answered from the cache
    fn on_cache_hit(&self, _key: &str) {}

    /// A cache lookup started a computation
    fn on_cache_miss(&self, _key: &str) {}

    /// A retry was scheduled after failed attempt `attempt` (1-based)
    fn on_retry(&self, _attempt: u32, _delay: Duration) {}

    /// A logical request finished
    fn on_request_complete(&self, _duration: Duration, _outcome: &RequestOutcome) {}

    /// The number of logical requests in flight changed to `active`
    fn on_active_requests(&self, _active: u64) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ResilienceObserver for NoopObserver {}

/// Observer that turns events into `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ResilienceObserver for TracingObserver {
    fn on_admission_denied(&self, key: &str, retry_after: Duration) {
        debug!(
            key = key,
            retry_after_ms = retry_after.as_millis() as u64,
            "Admission denied"
        );
    }

    fn on_circuit_state_change(&self, key: &str, from: CircuitState, to: CircuitState) {
        info!(key = key, from = from.as_str(), to = to.as_str(), "Circuit state change");
    }

    fn on_cache_hit(&self, key: &str) {
        debug!(key = key, "Cache hit");
    }

    fn on_cache_miss(&self, key: &str) {
        debug!(key = key, "Cache miss");
    }

    fn on_retry(&self, attempt: u32, delay: Duration) {
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");
    }

    fn on_request_complete(&self, duration: Duration, outcome: &RequestOutcome) {
        match outcome {
            RequestOutcome::Success { status } => debug!(
                duration_ms = duration.as_millis() as u64,
                status = ?status,
                "Request complete"
            ),
            RequestOutcome::Failure { class } => info!(
                duration_ms = duration.as_millis() as u64,
                class = *class,
                "Request failed"
            ),
        }
    }

    fn on_active_requests(&self, active: u64) {
        trace!(active, "Active requests");
    }
}

/// Observer that records events through a [`MetricsCollector`].
pub struct MetricsObserver<M> {
    collector: Arc<M>,
}

impl<M: MetricsCollector> MetricsObserver<M> {
    /// Wrap a collector
    pub fn new(collector: Arc<M>) -> Self {
        Self { collector }
    }

    /// The wrapped collector
    pub fn collector(&self) -> &Arc<M> {
        &self.collector
    }
}

impl<M: MetricsCollector> ResilienceObserver for MetricsObserver<M> {
    fn on_admission_denied(&self, _key: &str, _retry_after: Duration) {
        self.collector
            .increment_counter(metric_names::RATE_LIMIT_DENIED, 1, &[]);
    }

    fn on_circuit_state_change(&self, key: &str, _from: CircuitState, to: CircuitState) {
        self.collector.set_gauge(
            metric_names::CIRCUIT_BREAKER_STATE,
            to.as_gauge(),
            &[("endpoint", key)],
        );
        self.collector.increment_counter(
            metric_names::CIRCUIT_BREAKER_TRANSITIONS,
            1,
            &[("to", to.as_str())],
        );
    }

    fn on_cache_hit(&self, _key: &str) {
        self.collector.increment_counter(metric_names::CACHE_HITS, 1, &[]);
    }

    fn on_cache_miss(&self, _key: &str) {
        self.collector
            .increment_counter(metric_names::CACHE_MISSES, 1, &[]);
    }

    fn on_retry(&self, _attempt: u32, delay: Duration) {
        self.collector
            .increment_counter(metric_names::RETRY_ATTEMPTS, 1, &[]);
        self.collector.record_histogram(
            metric_names::RETRY_DELAY_MS,
            delay.as_secs_f64() * 1000.0,
            &[],
        );
    }

    fn on_request_complete(&self, duration: Duration, outcome: &RequestOutcome) {
        self.collector.increment_counter(
            metric_names::REQUEST_COUNT,
            1,
            &[("outcome", outcome.label())],
        );
        self.collector.record_histogram(
            metric_names::REQUEST_DURATION_MS,
            duration.as_secs_f64() * 1000.0,
            &[],
        );
        if let RequestOutcome::Failure { class } = outcome {
            self.collector
                .increment_counter(metric_names::REQUEST_ERRORS, 1, &[("class", *class)]);
        }
    }

    fn on_active_requests(&self, active: u64) {
        self.collector
            .set_gauge(metric_names::ACTIVE_REQUESTS, active as f64, &[]);
    }
}

/// Fans every event out to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ResilienceObserver>>,
}

impl CompositeObserver {
    /// Empty composite
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer
    pub fn with(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Number of observers
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// True when no observer is registered
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl ResilienceObserver for CompositeObserver {
    fn on_admission_denied(&self, key: &str, retry_after: Duration) {
        for o in &self.observers {
            o.on_admission_denied(key, retry_after);
        }
    }

    fn on_circuit_state_change(&self, key: &str, from: CircuitState, to: CircuitState) {
        for o in &self.observers {
            o.on_circuit_state_change(key, from, to);
        }
    }

    fn on_cache_hit(&self, key: &str) {
        for o in &self.observers {
            o.on_cache_hit(key);
        }
    }

    fn on_cache_miss(&self, key: &str) {
        for o in &self.observers {
            o.on_cache_miss(key);
        }
    }

    fn on_retry(&self, attempt: u32, delay: Duration) {
        for o in &self.observers {
            o.on_retry(attempt, delay);
        }
    }

    fn on_request_complete(&self, duration: Duration, outcome: &RequestOutcome) {
        for o in &self.observers {
            o.on_request_complete(duration, outcome);
        }
    }

    fn on_active_requests(&self, active: u64) {
        for o in &self.observers {
            o.on_active_requests(active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::InMemoryMetricsCollector;

    #[test]
    fn test_metrics_observer_records_events() {
        let collector = Arc::new(InMemoryMetricsCollector::new());
        let observer = MetricsObserver::new(Arc::clone(&collector));

        observer.on_admission_denied("api.example.com/v1", Duration::from_secs(1));
        observer.on_circuit_state_change(
            "api.example.com",
            CircuitState::Closed,
            CircuitState::Open,
        );
        observer.on_retry(1, Duration::from_millis(500));
        observer.on_request_complete(
            Duration::from_millis(20),
            &RequestOutcome::Failure { class: "timeout" },
        );

        assert_eq!(collector.get_counter(metric_names::RATE_LIMIT_DENIED), 1);
        assert_eq!(
            collector.get_gauge("http_resilience.circuit_breaker.state:endpoint=api.example.com"),
            Some(1.0)
        );
        assert_eq!(collector.get_counter(metric_names::RETRY_ATTEMPTS), 1);
        assert_eq!(collector.get_histogram(metric_names::RETRY_DELAY_MS), vec![500.0]);
        assert_eq!(
            collector.get_counter("http_resilience.requests.errors:class=timeout"),
            1
        );
        assert_eq!(collector.counter_total(metric_names::REQUEST_COUNT), 1);
    }

    #[test]
    fn test_active_requests_gauge_follows_last_value() {
        let collector = Arc::new(InMemoryMetricsCollector::new());
        let composite = CompositeObserver::new()
            .with(Arc::new(MetricsObserver::new(Arc::clone(&collector))))
            .with(Arc::new(TracingObserver));

        composite.on_active_requests(1);
        composite.on_active_requests(2);
        assert_eq!(collector.get_gauge(metric_names::ACTIVE_REQUESTS), Some(2.0));

        composite.on_active_requests(0);
        assert_eq!(collector.get_gauge(metric_names::ACTIVE_REQUESTS), Some(0.0));
    }

    #[test]
    fn test_composite_fans_out() {
        let first = Arc::new(InMemoryMetricsCollector::new());
        let second = Arc::new(InMemoryMetricsCollector::new());
        let composite = CompositeObserver::new()
            .with(Arc::new(MetricsObserver::new(Arc::clone(&first))))
            .with(Arc::new(MetricsObserver::new(Arc::clone(&second))))
            .with(Arc::new(TracingObserver));

        composite.on_cache_hit("k");
        composite.on_cache_miss("k");

        assert_eq!(composite.len(), 3);
        assert_eq!(first.get_counter(metric_names::CACHE_HITS), 1);
        assert_eq!(second.get_counter(metric_names::CACHE_MISSES), 1);
    }

    #[test]
    fn test_outcome_label() {
        assert_eq!(RequestOutcome::Success { status: Some(200) }.label(), "success");
        assert_eq!(RequestOutcome::Failure { class: "permanent" }.label(), "failure");
    }
}
