//! Observability: structured logging, metrics, event observers and trace
//! propagation headers.
//!
//! Components log through `tracing` on their own. Applications that want
//! numbers attach a [`ResilienceObserver`], typically a [`MetricsObserver`]
//! over an [`InMemoryMetricsCollector`] or their own [`MetricsCollector`].
//!
//! ```rust,no_run
//! use integrations_http_resilience::observability::{
//!     InMemoryMetricsCollector, LogFormat, LogLevel, LoggingConfig, MetricsObserver,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! LoggingConfig::new()
//!     .with_level(LogLevel::Info)
//!     .with_format(LogFormat::Json)
//!     .init()?;
//!
//! let collector = Arc::new(InMemoryMetricsCollector::new());
//! let observer = Arc::new(MetricsObserver::new(Arc::clone(&collector)));
//! # let _ = observer;
//! # Ok(())
//! # }
//! ```

mod events;
mod logging;
mod metrics;
mod trace_context;

pub use events::*;
pub use logging::*;
pub use metrics::*;
pub use trace_context::*;
