//! # HTTP Resilience Layer
//!
//! Protects outbound HTTP calls with the usual set of client-side guards,
//! composed in a fixed order per logical request:
//!
//! 1. Response cache with TTL, LRU eviction and miss coalescing
//! 2. Rate limiting (token bucket, sliding window or fixed window) per key
//! 3. Circuit breaker per endpoint
//! 4. Retry with exponential backoff, jitter and a per-attempt timeout
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_http_resilience::{ResilienceConfig, ResilientClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ResilientClient::new(ResilienceConfig::from_env()?)?;
//!
//!     let response = client.get("https://api.example.com/v1/items").await?;
//!     println!("{}", response.text());
//!
//!     println!("{}", serde_json::to_string_pretty(&client.stats())?);
//!     Ok(())
//! }
//! ```
//!
//! The layers are usable on their own as well: [`RateLimiter`],
//! [`CircuitBreakerRegistry`], [`RetryExecutor`] and [`CacheManager`], or
//! [`RequestOrchestrator`] to run arbitrary async operations through all of
//! them.
//!
//! ## Module Organization
//!
//! - `client` - HTTP client over the orchestrator
//! - `config` - Configuration types, builder and environment loading
//! - `resilience` - Rate limiter, circuit breaker, retry and orchestrator
//! - `cache` - TTL/LRU store and the coalescing cache manager
//! - `transport` - Single-exchange HTTP transport
//! - `errors` - Error types and retry classification
//! - `observability` - Logging setup, metrics, layer events and trace headers

#![warn(clippy::all)]

pub mod cache;
pub mod client;
pub mod config;
pub mod errors;
pub mod observability;
pub mod resilience;
pub mod transport;

#[cfg(test)]
pub mod mocks;

pub use cache::{Cache, CacheConfig, CacheManager, CacheManagerStats, CacheStats};
pub use client::{ClientStats, HealthReport, HealthStatus, ResilientClient, ResilientClientBuilder};
pub use config::{ResilienceConfig, ResilienceConfigBuilder};
pub use errors::{ResilienceError, ResilienceResult};
pub use observability::{
    CompositeObserver, InMemoryMetricsCollector, LogFormat, LogLevel, LoggingConfig,
    MetricsCollector, MetricsObserver, NoopMetricsCollector, NoopObserver, RequestOutcome,
    RequestTracer, ResilienceObserver, TraceContext, TracingObserver,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, RateLimitConfig,
    RateLimitStrategy, RateLimiter, RequestKeys, RequestOrchestrator, RetryConfig,
    RetryExecutor, RetryHook,
};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

/// Crate version, reported by stats and health checks
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent by [`ReqwestTransport`]
pub const DEFAULT_USER_AGENT: &str = concat!("integrations-http-resilience/", env!("CARGO_PKG_VERSION"));

/// Statuses treated as transient unless configured otherwise
pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];
