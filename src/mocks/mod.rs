//! Mock implementations for testing.

use crate::errors::{ResilienceError, ResilienceResult};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Transport replaying scripted results in order.
///
/// Once the script runs out, the default response is returned if one is set,
/// otherwise an internal error.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<ResilienceResult<HttpResponse>>>,
    default_response: Mutex<Option<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
}

impl MockTransport {
    /// Create a mock with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response
    pub fn push_response(&self, response: HttpResponse) {
        self.script.lock().push_back(Ok(response));
    }

    /// Queue an error
    pub fn push_error(&self, error: ResilienceError) {
        self.script.lock().push_back(Err(error));
    }

    /// Response returned once the script is exhausted
    pub fn set_default_response(&self, response: HttpResponse) {
        *self.default_response.lock() = Some(response);
    }

    /// Number of exchanges attempted
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request seen, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute_once(&self, request: &HttpRequest) -> ResilienceResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if let Some(next) = self.script.lock().pop_front() {
            return next;
        }
        self.default_response
            .lock()
            .clone()
            .ok_or_else(|| ResilienceError::Internal {
                message: format!("no scripted response for {} {}", request.method, request.url),
            })
    }
}
