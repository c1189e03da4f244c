//! Per-endpoint circuit breaker and its registry.

use crate::config::duration_secs;
use crate::errors::{ResilienceError, ResilienceResult};
use crate::observability::ResilienceObserver;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are blocked
    Open,
    /// Circuit is half-open, testing if the endpoint recovered
    HalfOpen,
}

impl CircuitState {
    /// Stable name used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Gauge value (0=closed, 1=open, 2=half-open)
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures that open the circuit
    pub failure_threshold: u32,
    /// Half-open successes that close the circuit
    pub success_threshold: u32,
    /// Time after the last failure before a probe is allowed
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Concurrent probes admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Set success threshold
    pub fn success_threshold(mut self, n: u32) -> Self {
        self.success_threshold = n;
        self
    }

    /// Set open timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set half-open max concurrent calls
    pub fn half_open_max_calls(mut self, n: u32) -> Self {
        self.half_open_max_calls = n;
        self
    }

    /// Reject zero thresholds
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::configuration(
                "circuit breaker failure_threshold must be greater than zero",
            ));
        }
        if self.success_threshold == 0 {
            return Err(ResilienceError::configuration(
                "circuit breaker success_threshold must be greater than zero",
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(ResilienceError::configuration(
                "circuit breaker half_open_max_calls must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerEvent {
    /// A caller wants to run the protected operation
    Attempt,
    /// An admitted call succeeded
    Success,
    /// An admitted call failed
    Failure,
    /// Operator reset
    Reset,
}

/// Result of feeding an event to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Run the operation; `Some(generation)` when it holds a half-open slot
    Admitted(Option<u64>),
    /// Fail fast
    Rejected,
    /// Outcome recorded, nothing to admit
    Recorded,
}

/// State and counters, always updated together under one lock
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    half_open_inflight: u32,
    /// Bumped on every entry into half-open so stale slots are not released
    half_open_generation: u64,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            half_open_inflight: 0,
            half_open_generation: 0,
        }
    }
}

impl BreakerState {
    /// The single transition function: every edge of the state machine lives here.
    fn apply(
        &mut self,
        event: BreakerEvent,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> (Admission, Option<(CircuitState, CircuitState)>) {
        let from = self.state;
        let admission = match (self.state, event) {
            (_, BreakerEvent::Reset) => {
                *self = BreakerState {
                    half_open_generation: self.half_open_generation,
                    ..BreakerState::default()
                };
                Admission::Recorded
            }

            (CircuitState::Closed, BreakerEvent::Attempt) => Admission::Admitted(None),
            (CircuitState::Open, BreakerEvent::Attempt) => {
                let cooled_down = self
                    .last_failure
                    .map_or(true, |at| now.saturating_duration_since(at) >= config.timeout);
                if cooled_down {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    self.half_open_inflight = 0;
                    self.half_open_generation += 1;
                    self.admit_probe(config)
                } else {
                    Admission::Rejected
                }
            }
            (CircuitState::HalfOpen, BreakerEvent::Attempt) => self.admit_probe(config),

            (CircuitState::Closed, BreakerEvent::Success) => {
                self.failure_count = 0;
                Admission::Recorded
            }
            (CircuitState::HalfOpen, BreakerEvent::Success) => {
                self.success_count += 1;
                if self.success_count >= config.success_threshold {
                    *self = BreakerState {
                        half_open_generation: self.half_open_generation,
                        ..BreakerState::default()
                    };
                }
                Admission::Recorded
            }
            // Late success from a call admitted before the circuit opened
            (CircuitState::Open, BreakerEvent::Success) => Admission::Recorded,

            (state, BreakerEvent::Failure) => {
                self.failure_count = self.failure_count.saturating_add(1);
                self.last_failure = Some(now);
                match state {
                    CircuitState::HalfOpen => {
                        self.state = CircuitState::Open;
                        self.success_count = 0;
                        self.half_open_inflight = 0;
                    }
                    CircuitState::Closed if self.failure_count >= config.failure_threshold => {
                        self.state = CircuitState::Open;
                    }
                    _ => {}
                }
                Admission::Recorded
            }
        };

        let transition = (from != self.state).then_some((from, self.state));
        (admission, transition)
    }

    fn admit_probe(&mut self, config: &CircuitBreakerConfig) -> Admission {
        if self.half_open_inflight < config.half_open_max_calls {
            self.half_open_inflight += 1;
            Admission::Admitted(Some(self.half_open_generation))
        } else {
            Admission::Rejected
        }
    }

    fn release_probe(&mut self, generation: u64) {
        if self.state == CircuitState::HalfOpen && self.half_open_generation == generation {
            self.half_open_inflight = self.half_open_inflight.saturating_sub(1);
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Failures recorded since the last close
    pub failure_count: u32,
    /// Half-open successes so far
    pub success_count: u32,
    /// Probes currently running
    pub half_open_inflight: u32,
    /// Seconds since the last failure
    pub last_failure_age_secs: Option<f64>,
}

/// Circuit breaker guarding one endpoint.
///
/// The admission decision and the outcome bookkeeping are each one critical
/// section; the protected operation runs with no lock held.
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    observer: Option<Arc<dyn ResilienceObserver>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for `key`
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> ResilienceResult<Self> {
        config.validate()?;
        Ok(Self::with_validated(key.into(), config, None))
    }

    fn with_validated(
        key: String,
        config: CircuitBreakerConfig,
        observer: Option<Arc<dyn ResilienceObserver>>,
    ) -> Self {
        Self {
            key,
            config,
            state: Mutex::new(BreakerState::default()),
            observer,
        }
    }

    /// Report state changes to an observer
    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Endpoint key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state. Does not advance Open to HalfOpen; only a call does.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Failures recorded since the last close
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Snapshot of state and counters
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock();
        CircuitBreakerStats {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            half_open_inflight: state.half_open_inflight,
            last_failure_age_secs: state.last_failure.map(|at| at.elapsed().as_secs_f64()),
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// Fails fast with [`ResilienceError::CircuitBreakerOpen`] when the circuit
    /// is open (and still cooling down) or the half-open probe budget is used
    /// up. Any error from the operation is recorded as a failure and returned
    /// unchanged.
    pub async fn call<F, Fut, T>(&self, operation: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let permit = self.try_acquire()?;
        let result = operation().await;
        match &result {
            Ok(_) => permit.succeed(),
            Err(e) => {
                debug!(key = %self.key, error = %e, "Circuit breaker recorded failure");
                permit.fail();
            }
        }
        result
    }

    /// Force the breaker back to Closed and clear its counters
    pub fn reset(&self) {
        info!(key = %self.key, "Circuit breaker manually reset");
        self.apply(BreakerEvent::Reset);
    }

    fn try_acquire(&self) -> ResilienceResult<CallPermit<'_>> {
        match self.apply(BreakerEvent::Attempt) {
            Admission::Admitted(half_open_generation) => Ok(CallPermit {
                breaker: self,
                half_open_generation,
                settled: false,
            }),
            _ => {
                let failure_count = self.failure_count();
                debug!(key = %self.key, failure_count, "Circuit breaker rejected call");
                Err(ResilienceError::CircuitBreakerOpen {
                    key: self.key.clone(),
                    failure_count,
                })
            }
        }
    }

    fn apply(&self, event: BreakerEvent) -> Admission {
        let (admission, transition) = {
            let mut state = self.state.lock();
            state.apply(event, &self.config, Instant::now())
        };
        if let Some((from, to)) = transition {
            self.notify_state_change(from, to);
        }
        admission
    }

    fn settle(&self, event: BreakerEvent, half_open_generation: Option<u64>) {
        let transition = {
            let mut state = self.state.lock();
            if let Some(generation) = half_open_generation {
                state.release_probe(generation);
            }
            state.apply(event, &self.config, Instant::now()).1
        };
        if let Some((from, to)) = transition {
            self.notify_state_change(from, to);
        }
    }

    fn release(&self, generation: u64) {
        self.state.lock().release_probe(generation);
    }

    fn notify_state_change(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(
                key = %self.key,
                from = from.as_str(),
                "Circuit breaker opened"
            ),
            _ => info!(
                key = %self.key,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker state changed"
            ),
        }
        if let Some(observer) = &self.observer {
            observer.on_circuit_state_change(&self.key, from, to);
        }
    }
}

/// Admission handed out by [`CircuitBreaker::try_acquire`].
///
/// Dropping it without settling (the caller was cancelled) frees a half-open
/// slot but records no outcome.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    half_open_generation: Option<u64>,
    settled: bool,
}

impl CallPermit<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker
            .settle(BreakerEvent::Success, self.half_open_generation);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker
            .settle(BreakerEvent::Failure, self.half_open_generation);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(generation) = self.half_open_generation {
            self.breaker.release(generation);
        }
    }
}

/// Owns one [`CircuitBreaker`] per endpoint key, created on first reference.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    observer: Option<Arc<dyn ResilienceObserver>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry; every breaker shares `config`
    pub fn new(config: CircuitBreakerConfig) -> ResilienceResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            observer: None,
        })
    }

    /// Attach an observer to every breaker the registry creates
    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Configuration shared by all breakers
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Breaker for `key`, creating it in Closed state if needed
    pub fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(key) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key = key, "Creating circuit breaker");
                Arc::new(CircuitBreaker::with_validated(
                    key.to_string(),
                    self.config.clone(),
                    self.observer.clone(),
                ))
            })
            .clone()
    }

    /// Breaker for `key`, if one exists
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(key).cloned()
    }

    /// Run `operation` through the breaker for `key`
    pub async fn call<F, Fut, T>(&self, key: &str, operation: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let breaker = self.get_or_create(key);
        breaker.call(operation).await
    }

    /// Manually reset one breaker
    pub fn reset(&self, key: &str) -> bool {
        match self.get(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Manually reset every breaker
    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.read().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// Stats for every breaker, ordered by key
    pub fn all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers
            .read()
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.stats()))
            .collect()
    }

    /// Number of breakers created so far
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// True when no endpoint has been referenced yet
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new("api.example.com", config).unwrap()
    }

    fn server_error() -> ResilienceError {
        ResilienceError::Transient {
            message: "Service unavailable".to_string(),
            status_code: Some(503),
        }
    }

    async fn fail(cb: &CircuitBreaker) -> ResilienceResult<()> {
        cb.call(|| async { Err::<(), _>(server_error()) }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> ResilienceResult<u32> {
        cb.call(|| async { Ok(42) }).await
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::new().failure_threshold(0).validate().is_err());
        assert!(CircuitBreakerConfig::new().success_threshold(0).validate().is_err());
        assert!(CircuitBreakerConfig::new().half_open_max_calls(0).validate().is_err());
        assert!(CircuitBreaker::new("k", CircuitBreakerConfig::new().failure_threshold(0)).is_err());
    }

    #[tokio::test]
    async fn test_circuit_breaker_starts_closed() {
        let cb = breaker(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(succeed(&cb).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let cb = breaker(CircuitBreakerConfig::new().failure_threshold(3));

        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = cb
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(ResilienceError::CircuitBreakerOpen { failure_count: 3, .. })
        ));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_while_closed() {
        let cb = breaker(CircuitBreakerConfig::new().failure_threshold(3));
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.failure_count(), 0);
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_permanent_errors_count_as_failures() {
        let cb = breaker(CircuitBreakerConfig::new().failure_threshold(1));
        let result = cb
            .call(|| async {
                Err::<(), _>(ResilienceError::Permanent {
                    message: "Bad request".to_string(),
                    status_code: Some(400),
                })
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::Permanent { .. })));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_invokes_operation() {
        let cb = breaker(
            CircuitBreakerConfig::new()
                .failure_threshold(2)
                .success_threshold(2)
                .timeout(Duration::from_millis(50)),
        );
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Observing the state alone does not move the breaker
        assert_eq!(cb.state(), CircuitState::Open);

        assert_eq!(succeed(&cb).await.unwrap(), 42);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
        assert_eq!(cb.stats().success_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_and_resets_successes() {
        let cb = breaker(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .success_threshold(3)
                .timeout(Duration::from_millis(20)),
        );
        fail(&cb).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(30)).await;

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.stats().success_count, 2);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().success_count, 0);
        assert!(matches!(
            succeed(&cb).await,
            Err(ResilienceError::CircuitBreakerOpen { .. })
        ));
    }

    #[test]
    fn test_half_open_limits_concurrent_probes() {
        let config = CircuitBreakerConfig::new()
            .failure_threshold(1)
            .half_open_max_calls(2)
            .timeout(Duration::ZERO);
        let mut state = BreakerState::default();
        let now = Instant::now();

        state.apply(BreakerEvent::Failure, &config, now);
        assert_eq!(state.state, CircuitState::Open);

        let (first, transition) = state.apply(BreakerEvent::Attempt, &config, now);
        assert_eq!(first, Admission::Admitted(Some(1)));
        assert_eq!(transition, Some((CircuitState::Open, CircuitState::HalfOpen)));
        let (second, _) = state.apply(BreakerEvent::Attempt, &config, now);
        assert_eq!(second, Admission::Admitted(Some(1)));
        let (third, _) = state.apply(BreakerEvent::Attempt, &config, now);
        assert_eq!(third, Admission::Rejected);

        state.release_probe(1);
        let (fourth, _) = state.apply(BreakerEvent::Attempt, &config, now);
        assert_eq!(fourth, Admission::Admitted(Some(1)));
    }

    #[test]
    fn test_stale_probe_release_is_ignored() {
        let config = CircuitBreakerConfig::new()
            .failure_threshold(1)
            .half_open_max_calls(1)
            .timeout(Duration::ZERO);
        let mut state = BreakerState::default();
        let now = Instant::now();

        state.apply(BreakerEvent::Failure, &config, now);
        state.apply(BreakerEvent::Attempt, &config, now);
        state.apply(BreakerEvent::Failure, &config, now);
        let (admission, _) = state.apply(BreakerEvent::Attempt, &config, now);
        assert_eq!(admission, Admission::Admitted(Some(2)));

        state.release_probe(1);
        assert_eq!(state.half_open_inflight, 1);
    }

    #[tokio::test]
    async fn test_cancelled_probe_frees_slot() {
        let cb = Arc::new(breaker(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .half_open_max_calls(1)
                .timeout(Duration::ZERO),
        ));
        fail(&cb).await.unwrap_err();

        let slow = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.call(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cb.stats().half_open_inflight, 1);
        assert!(matches!(
            succeed(&cb).await,
            Err(ResilienceError::CircuitBreakerOpen { .. })
        ));

        slow.abort();
        let _ = slow.await;
        assert_eq!(cb.stats().half_open_inflight, 0);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(succeed(&cb).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let cb = breaker(CircuitBreakerConfig::new().failure_threshold(1));
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().last_failure_age_secs, None);
        assert!(succeed(&cb).await.is_ok());
    }

    #[tokio::test]
    async fn test_registry_isolates_endpoints() {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::new().failure_threshold(1)).unwrap();
        assert!(registry.is_empty());

        let _ = registry
            .call("a.example.com", || async { Err::<(), _>(server_error()) })
            .await;
        let ok = registry.call("b.example.com", || async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        assert_eq!(registry.len(), 2);
        let stats = registry.all_stats();
        assert_eq!(stats["a.example.com"].state, CircuitState::Open);
        assert_eq!(stats["b.example.com"].state, CircuitState::Closed);

        assert!(Arc::ptr_eq(
            &registry.get_or_create("a.example.com"),
            &registry.get("a.example.com").unwrap()
        ));

        assert!(registry.reset("a.example.com"));
        assert!(!registry.reset("c.example.com"));
        assert_eq!(
            registry.get("a.example.com").unwrap().state(),
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_registry_reset_all() {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::new().failure_threshold(1)).unwrap();
        for key in ["a", "b"] {
            let _ = registry
                .call(key, || async { Err::<(), _>(server_error()) })
                .await;
        }
        registry.reset_all();
        assert!(registry
            .all_stats()
            .values()
            .all(|s| s.state == CircuitState::Closed));
    }
}
