//! End-to-end tests for the composed resilience stack

use super::*;
use crate::cache::CacheConfig;
use crate::config::ResilienceConfig;
use crate::errors::ResilienceError;
use crate::observability::{metric_names, InMemoryMetricsCollector, MetricsObserver};
use futures::future::join_all;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ENDPOINT: &str = "api.example.com";

fn unavailable() -> ResilienceError {
    ResilienceError::Transient {
        message: "Service unavailable".to_string(),
        status_code: Some(503),
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig::default()
        .base_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(50))
}

#[tokio::test]
async fn test_circuit_opens_fails_fast_and_recovers() {
    let config = ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig::new()
            .failure_threshold(2)
            .success_threshold(1)
            .timeout(Duration::from_secs(1)),
        retry: fast_retry(),
        ..Default::default()
    };
    let orchestrator: RequestOrchestrator<&'static str> = RequestOrchestrator::new(config).unwrap();

    for _ in 0..2 {
        let result = orchestrator
            .execute(ENDPOINT, None, || async { Err(unavailable()) })
            .await;
        assert!(matches!(result, Err(ResilienceError::Transient { .. })));
    }

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let result = orchestrator
        .execute(ENDPOINT, None, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok("ok") }
        })
        .await;
    match result {
        Err(ResilienceError::CircuitBreakerOpen { key, failure_count }) => {
            assert_eq!(key, ENDPOINT);
            assert_eq!(failure_count, 2);
        }
        other => panic!("expected open circuit, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let counter = Arc::clone(&calls);
    let result = orchestrator
        .execute(ENDPOINT, None, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok("ok") }
        })
        .await;
    assert_eq!(result.unwrap(), "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let breaker = orchestrator.circuit_breakers().unwrap().get(ENDPOINT).unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test]
async fn test_observer_sees_every_layer() {
    let collector = Arc::new(InMemoryMetricsCollector::new());
    let config = ResilienceConfig {
        rate_limit: RateLimitConfig::new()
            .max_requests(3)
            .strategy(RateLimitStrategy::FixedWindow),
        circuit_breaker: CircuitBreakerConfig::new().failure_threshold(1),
        retry: fast_retry(),
        ..Default::default()
    };
    let orchestrator: RequestOrchestrator<u32> = RequestOrchestratorBuilder::new()
        .config(config)
        .observer(Arc::new(MetricsObserver::new(Arc::clone(&collector))))
        .build()
        .unwrap();

    // miss, then hit
    for _ in 0..2 {
        orchestrator
            .execute(ENDPOINT, Some("GET /v1/items"), || async { Ok(1) })
            .await
            .unwrap();
    }

    // two retries, then the circuit opens
    let _ = orchestrator
        .execute(ENDPOINT, None, || async { Err::<u32, _>(unavailable()) })
        .await;

    // a different bucket so the breaker, not the limiter, answers
    let _ = orchestrator
        .execute("other.example.com", None, || async { Ok(2) })
        .await;

    assert_eq!(collector.get_counter(metric_names::CACHE_MISSES), 1);
    assert_eq!(collector.get_counter(metric_names::CACHE_HITS), 1);
    assert_eq!(collector.get_counter(metric_names::RETRY_ATTEMPTS), 2);
    assert_eq!(
        collector.get_counter("http_resilience.circuit_breaker.transitions:to=open"),
        1
    );
    assert_eq!(
        collector.get_gauge("http_resilience.circuit_breaker.state:endpoint=api.example.com"),
        Some(1.0)
    );
    assert_eq!(collector.counter_total(metric_names::REQUEST_COUNT), 4);
    assert_eq!(
        collector.get_counter("http_resilience.requests.errors:class=transient"),
        1
    );

    // Fourth admission on the same bucket is denied
    let _ = orchestrator
        .execute(ENDPOINT, None, || async { Ok(3) })
        .await;
    let denied = orchestrator
        .execute(ENDPOINT, None, || async { Ok(3) })
        .await;
    assert!(matches!(denied, Err(ResilienceError::RateLimitExceeded { .. })));
    assert_eq!(collector.get_counter(metric_names::RATE_LIMIT_DENIED), 1);
}

#[tokio::test]
async fn test_concurrent_cached_requests_run_operation_once() {
    let orchestrator: RequestOrchestrator<String> = RequestOrchestrator::new(ResilienceConfig {
        cache: CacheConfig::default().max_size(10),
        ..Default::default()
    })
    .unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let requests = (0..50).map(|_| {
        let counter = Arc::clone(&calls);
        orchestrator.execute(ENDPOINT, Some("GET https://api.example.com/v1"), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok("payload".to_string())
            }
        })
    });
    let results = join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| matches!(r.as_deref(), Ok("payload"))));
    let stats = orchestrator.stats();
    assert_eq!(stats.rate_limit_keys, 1);
    assert_eq!(stats.cache.unwrap().misses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_schedule_through_orchestrator() {
    let config = ResilienceConfig {
        retry: RetryConfig::default()
            .max_retries(3)
            .base_delay(Duration::from_millis(500)),
        ..Default::default()
    };
    let orchestrator: RequestOrchestrator<u32> = RequestOrchestrator::new(config).unwrap();
    let started = Arc::new(Mutex::new(Vec::new()));

    let times = Arc::clone(&started);
    let result = orchestrator
        .execute(ENDPOINT, None, move || {
            times.lock().push(tokio::time::Instant::now());
            async { Err::<u32, _>(unavailable()) }
        })
        .await;

    assert!(matches!(result, Err(ResilienceError::Transient { .. })));
    let times = started.lock().clone();
    assert_eq!(times.len(), 3);

    let first = times[1] - times[0];
    let second = times[2] - times[1];
    assert!(first >= Duration::from_millis(500) && first < Duration::from_millis(551));
    assert!(second >= Duration::from_millis(1000) && second < Duration::from_millis(1101));
}

#[tokio::test]
async fn test_retry_hook_can_abort() {
    struct AbortAfterFirst;

    #[async_trait::async_trait]
    impl RetryHook for AbortAfterFirst {
        async fn on_retry(&self, _context: RetryContext) -> RetryDecision {
            RetryDecision::Abort
        }
    }

    let orchestrator: RequestOrchestrator<u32> = RequestOrchestratorBuilder::new()
        .config(ResilienceConfig {
            retry: fast_retry(),
            ..Default::default()
        })
        .retry_hook(Arc::new(AbortAfterFirst))
        .build()
        .unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let result = orchestrator
        .execute(ENDPOINT, None, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(unavailable()) }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_separate_rate_limit_and_breaker_keys() {
    let orchestrator: RequestOrchestrator<u32> = RequestOrchestrator::new(ResilienceConfig {
        rate_limit: RateLimitConfig::new().max_requests(1),
        ..Default::default()
    })
    .unwrap();

    for path in ["api.example.com/a", "api.example.com/b"] {
        let value = orchestrator
            .execute_keyed(
                RequestKeys::new(ENDPOINT).rate_limit(path),
                || async { Ok(5) },
                |_| Some(200),
            )
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    let stats = orchestrator.stats();
    assert_eq!(stats.rate_limit_keys, 2);
    assert_eq!(stats.circuit_breakers.len(), 1);
}

#[tokio::test]
async fn test_abandoned_cached_request_still_settles_breaker() {
    let config = ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig::new()
            .failure_threshold(1)
            .success_threshold(1)
            .half_open_max_calls(1)
            .timeout(Duration::from_millis(100)),
        retry: fast_retry(),
        ..Default::default()
    };
    let orchestrator: RequestOrchestrator<&'static str> = RequestOrchestrator::new(config).unwrap();

    let _ = orchestrator
        .execute(ENDPOINT, None, || async {
            Err(ResilienceError::Permanent {
                message: "bad request".to_string(),
                status_code: Some(400),
            })
        })
        .await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    // The caller gives up while the half-open trial call is still running
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.execute(ENDPOINT, Some("GET /slow"), || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("slow")
        }),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let breaker = orchestrator.circuit_breakers().unwrap().get(ENDPOINT).unwrap();
    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.half_open_inflight, 0);
    assert_eq!(orchestrator.cache().unwrap().in_flight(), 0);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let cached = orchestrator
        .execute(ENDPOINT, Some("GET /slow"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok("recomputed") }
        })
        .await
        .unwrap();
    assert_eq!(cached, "slow");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let other = orchestrator
        .execute(ENDPOINT, None, || async { Ok("fresh") })
        .await
        .unwrap();
    assert_eq!(other, "fresh");
}
