//! Configuration for the resilience layer.
//!
//! Each component owns its own config type; [`ResilienceConfig`] bundles
//! them with the feature toggles used by the orchestrator and client.

use crate::cache::CacheConfig;
use crate::errors::{ResilienceError, ResilienceResult};
use crate::resilience::{CircuitBreakerConfig, RateLimitConfig, RateLimitStrategy, RetryConfig};
use crate::DEFAULT_RETRY_STATUSES;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Prefix of every environment variable read by [`ResilienceConfig::from_env`]
pub const ENV_PREFIX: &str = "HTTP_RESILIENCE_";

/// Serde helpers encoding a [`Duration`] as float seconds.
pub mod duration_secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as seconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    /// Deserialize from non-negative seconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        from_secs(secs).map_err(D::Error::custom)
    }

    pub(crate) fn from_secs(secs: f64) -> Result<Duration, String> {
        if secs < 0.0 {
            return Err(format!("invalid duration {secs}: expected non-negative seconds"));
        }
        Duration::try_from_secs_f64(secs)
            .map_err(|e| format!("invalid duration {secs}: {e}"))
    }

    /// Same encoding for optional durations; `null` means unset
    pub mod option {
        use super::from_secs;
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        /// Serialize as seconds or null
        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize from seconds or null
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<f64>::deserialize(deserializer)?
                .map(|secs| from_secs(secs).map_err(D::Error::custom))
                .transpose()
        }
    }
}

/// Complete configuration of the resilience stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Rate limiter settings
    pub rate_limit: RateLimitConfig,
    /// Circuit breaker settings, shared by every endpoint
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry settings
    pub retry: RetryConfig,
    /// Response cache settings
    pub cache: CacheConfig,
    /// Consult the rate limiter before each request
    pub enable_rate_limiting: bool,
    /// Route requests through per-endpoint circuit breakers
    pub enable_circuit_breaker: bool,
    /// Retry transient failures
    pub enable_retry: bool,
    /// Cache successful responses of cacheable requests
    pub enable_caching: bool,
    /// HTTP statuses treated as transient by the transport
    pub retry_statuses: Vec<u16>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            enable_rate_limiting: true,
            enable_circuit_breaker: true,
            enable_retry: true,
            enable_caching: true,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl ResilienceConfig {
    /// Creates a new configuration builder
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::default()
    }

    /// Every layer switched off; requests go straight to the transport once
    pub fn passthrough() -> Self {
        Self {
            enable_rate_limiting: false,
            enable_circuit_breaker: false,
            enable_retry: false,
            enable_caching: false,
            ..Default::default()
        }
    }

    /// Validate every component configuration
    pub fn validate(&self) -> ResilienceResult<()> {
        self.rate_limit.validate()?;
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.cache.validate()?;
        if let Some(status) = self
            .retry_statuses
            .iter()
            .find(|s| !(100..=599).contains(*s))
        {
            return Err(ResilienceError::configuration(format!(
                "retry_statuses contains invalid HTTP status {status}"
            )));
        }
        Ok(())
    }

    /// Whether a response status should be retried
    pub fn is_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Creates a configuration from `HTTP_RESILIENCE_*` environment variables
    /// layered over the defaults
    pub fn from_env() -> ResilienceResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> ResilienceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        let rl = &mut config.rate_limit;
        env.set("MAX_REQUESTS", &mut rl.max_requests)?;
        env.set_secs("WINDOW_SECS", &mut rl.window)?;
        if let Some(strategy) = env.raw("RATE_LIMIT_STRATEGY") {
            rl.strategy = parse_strategy(&strategy)?;
        }
        if let Some(burst) = env.parse::<u32>("BURST_SIZE")? {
            rl.burst_size = Some(burst);
        }

        let cb = &mut config.circuit_breaker;
        env.set("FAILURE_THRESHOLD", &mut cb.failure_threshold)?;
        env.set("SUCCESS_THRESHOLD", &mut cb.success_threshold)?;
        env.set_secs("CIRCUIT_TIMEOUT_SECS", &mut cb.timeout)?;
        env.set("HALF_OPEN_MAX_CALLS", &mut cb.half_open_max_calls)?;

        let retry = &mut config.retry;
        env.set("MAX_RETRIES", &mut retry.max_retries)?;
        env.set_secs("BASE_DELAY_SECS", &mut retry.base_delay)?;
        env.set_secs("MAX_DELAY_SECS", &mut retry.max_delay)?;
        env.set("JITTER", &mut retry.jitter)?;
        if let Some(secs) = env.parse::<f64>("ATTEMPT_TIMEOUT_SECS")? {
            retry.attempt_timeout = if secs == 0.0 {
                None
            } else {
                Some(secs_to_duration("ATTEMPT_TIMEOUT_SECS", secs)?)
            };
        }

        env.set("CACHE_MAX_SIZE", &mut config.cache.max_size)?;
        if let Some(secs) = env.parse::<f64>("CACHE_TTL_SECS")? {
            config.cache.default_ttl = if secs == 0.0 {
                None
            } else {
                Some(secs_to_duration("CACHE_TTL_SECS", secs)?)
            };
        }

        env.set("ENABLE_RATE_LIMITING", &mut config.enable_rate_limiting)?;
        env.set("ENABLE_CIRCUIT_BREAKER", &mut config.enable_circuit_breaker)?;
        env.set("ENABLE_RETRY", &mut config.enable_retry)?;
        env.set("ENABLE_CACHING", &mut config.enable_caching)?;

        if let Some(statuses) = env.raw("RETRY_STATUSES") {
            config.retry_statuses = statuses
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u16>().map_err(|_| {
                        ResilienceError::configuration(format!(
                            "{ENV_PREFIX}RETRY_STATUSES contains non-numeric status '{s}'"
                        ))
                    })
                })
                .collect::<ResilienceResult<_>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> ResilienceResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> ResilienceResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ResilienceError::configuration(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&contents)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> ResilienceResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ResilienceError::Internal {
            message: format!("failed to serialize configuration: {e}"),
        })
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}"))
    }

    fn parse<T: FromStr>(&self, name: &str) -> ResilienceResult<Option<T>> {
        match self.raw(name) {
            None => Ok(None),
            Some(value) => value.trim().parse().map(Some).map_err(|_| {
                ResilienceError::configuration(format!(
                    "{ENV_PREFIX}{name} has invalid value '{value}'"
                ))
            }),
        }
    }

    fn set<T: FromStr>(&self, name: &str, target: &mut T) -> ResilienceResult<()> {
        if let Some(value) = self.parse(name)? {
            *target = value;
        }
        Ok(())
    }

    fn set_secs(&self, name: &str, target: &mut Duration) -> ResilienceResult<()> {
        if let Some(secs) = self.parse::<f64>(name)? {
            *target = secs_to_duration(name, secs)?;
        }
        Ok(())
    }
}

fn secs_to_duration(name: &str, secs: f64) -> ResilienceResult<Duration> {
    duration_secs::from_secs(secs)
        .map_err(|e| ResilienceError::configuration(format!("{ENV_PREFIX}{name}: {e}")))
}

fn parse_strategy(value: &str) -> ResilienceResult<RateLimitStrategy> {
    match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "token_bucket" => Ok(RateLimitStrategy::TokenBucket),
        "sliding_window" => Ok(RateLimitStrategy::SlidingWindow),
        "fixed_window" => Ok(RateLimitStrategy::FixedWindow),
        other => Err(ResilienceError::configuration(format!(
            "unknown rate limit strategy '{other}'"
        ))),
    }
}

/// Builder for [`ResilienceConfig`]
#[derive(Debug, Default)]
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    /// Sets the rate limiter configuration
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = config;
        self
    }

    /// Sets the circuit breaker configuration
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Sets the retry configuration
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    /// Sets the cache configuration
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.config.cache = config;
        self
    }

    /// Enables or disables rate limiting
    pub fn enable_rate_limiting(mut self, enabled: bool) -> Self {
        self.config.enable_rate_limiting = enabled;
        self
    }

    /// Enables or disables circuit breaking
    pub fn enable_circuit_breaker(mut self, enabled: bool) -> Self {
        self.config.enable_circuit_breaker = enabled;
        self
    }

    /// Enables or disables retries
    pub fn enable_retry(mut self, enabled: bool) -> Self {
        self.config.enable_retry = enabled;
        self
    }

    /// Enables or disables response caching
    pub fn enable_caching(mut self, enabled: bool) -> Self {
        self.config.enable_caching = enabled;
        self
    }

    /// Sets the statuses treated as transient
    pub fn retry_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.config.retry_statuses = statuses.into();
        self
    }

    /// Builds and validates the configuration
    pub fn build(self) -> ResilienceResult<ResilienceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
