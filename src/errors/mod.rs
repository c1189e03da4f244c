//! Error types for the HTTP resilience layer.
//!
//! Every component returns [`ResilienceError`]; the variant decides whether
//! the retry loop may try again and how the failure is labelled in metrics.

mod error;

pub use error::{ResilienceError, ResilienceResult};
