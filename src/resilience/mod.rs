//! Admission control, failure isolation and retry, plus the orchestrator
//! that composes them with the response cache.

mod circuit_breaker;
mod orchestrator;
mod rate_limiter;
mod retry;

#[cfg(test)]
mod tests;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats,
    CircuitState,
};
pub use orchestrator::{
    OrchestratorStats, RequestKeys, RequestOrchestrator, RequestOrchestratorBuilder,
};
pub use rate_limiter::{
    rate_limit_key, RateLimitConfig, RateLimitStats, RateLimitStrategy, RateLimiter,
};
pub use retry::{RetryConfig, RetryContext, RetryDecision, RetryExecutor, RetryHook};
