use crate::config::duration_secs;
use crate::errors::{ResilienceError, ResilienceResult};
use crate::observability::ResilienceObserver;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts for one logical request, the first one included
    pub max_retries: u32,
    /// Delay after the first failed attempt
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    /// Upper bound for the exponential delay
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    /// Jitter as a fraction of the delay, drawn from `[0, jitter * delay)`
    pub jitter: f64,
    /// Time budget for a single attempt
    #[serde(with = "duration_secs::option")]
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff
    pub fn disabled() -> Self {
        Self {
            max_retries: 1,
            ..Default::default()
        }
    }

    /// Set total attempts
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the first backoff delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff cap
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter fraction
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set or clear the per-attempt time budget
    pub fn attempt_timeout(mut self, limit: Option<Duration>) -> Self {
        self.attempt_timeout = limit;
        self
    }

    /// Reject configurations that could never make an attempt
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.max_retries == 0 {
            return Err(ResilienceError::configuration(
                "retry max_retries must allow at least one attempt",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ResilienceError::configuration(
                "retry jitter must be between 0 and 1",
            ));
        }
        if self.attempt_timeout == Some(Duration::ZERO) {
            return Err(ResilienceError::configuration(
                "retry attempt_timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Retry executor that handles retry logic with exponential backoff
pub struct RetryExecutor {
    config: RetryConfig,
    retry_hook: Option<Arc<dyn RetryHook>>,
    observer: Option<Arc<dyn ResilienceObserver>>,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration
    pub fn new(config: RetryConfig) -> ResilienceResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            retry_hook: None,
            observer: None,
        })
    }

    /// Executor that makes exactly one attempt
    pub fn single_attempt() -> Self {
        Self {
            config: RetryConfig::disabled(),
            retry_hook: None,
            observer: None,
        }
    }

    /// Add a retry hook for custom retry logic
    pub fn with_hook(mut self, hook: Arc<dyn RetryHook>) -> Self {
        self.retry_hook = Some(hook);
        self
    }

    /// Report retries to an observer
    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute the given operation with retry logic.
    ///
    /// Non-retryable errors end the loop immediately; once the attempts are
    /// used up the last transient error is returned.
    pub async fn execute<F, Fut, T>(&self, operation: &str, f: F) -> ResilienceResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let result = self.run_attempt(&f).await;
            attempt += 1;

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    debug!(operation, attempt, error = %e, "Non-retryable failure");
                    return Err(e);
                }
                Err(e) => e,
            };

            if attempt >= self.config.max_retries {
                warn!(operation, attempts = attempt, error = %error, "Retries exhausted");
                return Err(error);
            }

            let mut delay = self.calculate_backoff(attempt - 1);

            if let Some(hook) = &self.retry_hook {
                match hook
                    .on_retry(RetryContext {
                        attempt,
                        error: error.clone(),
                        delay,
                        operation: operation.to_string(),
                    })
                    .await
                {
                    RetryDecision::Abort => return Err(error),
                    RetryDecision::Retry(custom_delay) => delay = custom_delay,
                    RetryDecision::Default => {}
                }
            }

            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient failure"
            );
            if let Some(observer) = &self.observer {
                observer.on_retry(attempt, delay);
            }

            sleep(delay).await;
        }
    }

    async fn run_attempt<F, Fut, T>(&self, f: &F) -> ResilienceResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        match self.config.attempt_timeout {
            Some(limit) => match timeout(limit, f()).await {
                Ok(result) => result,
                Err(_) => Err(ResilienceError::Timeout {
                    message: format!("Attempt exceeded {:?}", limit),
                }),
            },
            None => f().await,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (0-indexed), jitter included.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        let jitter_span = delay.as_secs_f64() * self.config.jitter;
        if jitter_span > 0.0 {
            let jitter = rand::thread_rng().gen_range(0.0..jitter_span);
            delay + Duration::from_secs_f64(jitter)
        } else {
            delay
        }
    }

    /// `min(max_delay, base_delay * 2^attempt)`
    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(62) as i32;
        let secs = self.config.base_delay.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.config.max_delay.as_secs_f64()))
    }
}

/// Hook for custom retry behavior
#[async_trait]
pub trait RetryHook: Send + Sync {
    /// Called before sleeping for a retry
    async fn on_retry(&self, context: RetryContext) -> RetryDecision;
}

/// Context information for a retry attempt
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Number of the attempt that just failed (1-based)
    pub attempt: u32,
    /// Error it failed with
    pub error: ResilienceError,
    /// Delay the executor intends to wait
    pub delay: Duration,
    /// Operation label
    pub operation: String,
}

/// Decision on how to proceed with a retry
#[derive(Debug)]
pub enum RetryDecision {
    /// Use the default retry behavior
    Default,
    /// Retry with a custom delay
    Retry(Duration),
    /// Abort the retry and return the error
    Abort,
}
