//! Error types for the HTTP resilience layer.

use crate::resilience::RateLimitStrategy;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for resilience operations
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Main error type for the resilience layer.
///
/// Admission and isolation failures (`RateLimitExceeded`, `CircuitBreakerOpen`)
/// are produced by this crate; operation failures (`Transient`, `Timeout`,
/// `Connection`, `Permanent`) come from the transport collaborator and decide
/// retry eligibility.
#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    /// Configuration error (non-positive window, capacity or threshold)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Admission denied by the rate limiter
    #[error("Rate limit exceeded for key '{key}' (retry after {retry_after:?})")]
    RateLimitExceeded {
        /// Bucket key that was denied
        key: String,
        /// Time until the bucket can admit another request
        retry_after: Duration,
        /// Algorithm that made the decision
        strategy: RateLimitStrategy,
    },

    /// Circuit breaker refused the call without invoking the operation
    #[error("Circuit breaker is open for '{key}' ({failure_count} failures)")]
    CircuitBreakerOpen {
        /// Endpoint key of the breaker
        key: String,
        /// Failure count observed when the call was rejected
        failure_count: u32,
    },

    /// Transient operation failure (retryable 5xx / 429 status, reset stream)
    #[error("Transient error: {message}")]
    Transient {
        /// Error message
        message: String,
        /// HTTP status code, when the failure came from a response
        status_code: Option<u16>,
    },

    /// An attempt exceeded its time budget
    #[error("Timeout: {message}")]
    Timeout {
        /// Error message
        message: String,
    },

    /// Connection could not be established
    #[error("Connection error: {message}")]
    Connection {
        /// Error message
        message: String,
    },

    /// Permanent operation failure (4xx class, validation)
    #[error("Permanent error: {message}")]
    Permanent {
        /// Error message
        message: String,
        /// HTTP status code, when the failure came from a response
        status_code: Option<u16>,
    },

    /// Internal error (unexpected conditions)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal issue
        message: String,
    },
}

impl ResilienceError {
    /// Build a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        ResilienceError::Configuration {
            message: message.into(),
        }
    }

    /// Returns true if the retry loop may attempt the operation again.
    ///
    /// Only transport-level transient conditions qualify: retryable statuses,
    /// timeouts and connection failures. Admission failures are handed back
    /// to the caller, who decides whether to wait.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient { .. }
                | ResilienceError::Timeout { .. }
                | ResilienceError::Connection { .. }
        )
    }

    /// Returns the admission hint carried by a rate limit denial.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ResilienceError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// HTTP status code attached to an operation failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ResilienceError::Transient { status_code, .. }
            | ResilienceError::Permanent { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Short stable label used for metrics and outcome recording.
    pub fn error_class(&self) -> &'static str {
        match self {
            ResilienceError::Configuration { .. } => "configuration",
            ResilienceError::RateLimitExceeded { .. } => "rate_limited",
            ResilienceError::CircuitBreakerOpen { .. } => "circuit_open",
            ResilienceError::Transient { .. } => "transient",
            ResilienceError::Timeout { .. } => "timeout",
            ResilienceError::Connection { .. } => "connection",
            ResilienceError::Permanent { .. } => "permanent",
            ResilienceError::Internal { .. } => "internal",
        }
    }
}

impl From<reqwest::Error> for ResilienceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResilienceError::Timeout {
                message: format!("Request timed out: {}", err),
            }
        } else if err.is_connect() {
            ResilienceError::Connection {
                message: format!("Connection failed: {}", err),
            }
        } else if err.is_builder() {
            ResilienceError::Permanent {
                message: format!("Invalid request: {}", err),
                status_code: None,
            }
        } else {
            ResilienceError::Transient {
                message: format!("Network error: {}", err),
                status_code: None,
            }
        }
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        ResilienceError::Configuration {
            message: format!("Invalid configuration document: {}", err),
        }
    }
}

impl From<url::ParseError> for ResilienceError {
    fn from(err: url::ParseError) -> Self {
        ResilienceError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}
