//! reqwest-backed transport.

use super::{HttpRequest, HttpResponse, HttpTransport};
use crate::errors::{ResilienceError, ResilienceResult};
use crate::{DEFAULT_RETRY_STATUSES, DEFAULT_USER_AGENT};
use async_trait::async_trait;
use http::header::RETRY_AFTER;
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tracing::trace;

/// Longest body excerpt carried in an error message
const ERROR_BODY_EXCERPT: usize = 200;

/// Transport over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    retry_statuses: Vec<u16>,
}

impl ReqwestTransport {
    /// Create a transport with its own client.
    ///
    /// `timeout` bounds the whole exchange at the client level; the retry
    /// layer applies its own per-attempt budget on top.
    pub fn new(timeout: Option<Duration>) -> ResilienceResult<Self> {
        let mut builder = Client::builder().user_agent(DEFAULT_USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| ResilienceError::Configuration {
            message: format!("Failed to create HTTP client: {}", e),
        })?;

        Ok(Self::with_client(client))
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }

    /// Statuses reported as transient
    pub fn retry_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.retry_statuses = statuses.into();
        self
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute_once(&self, request: &HttpRequest) -> ResilienceResult<HttpResponse> {
        trace!(method = %request.method, url = %request.url, "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        trace!(status = status.as_u16(), bytes = body.len(), "Received response");

        if status.is_client_error() || status.is_server_error() {
            return Err(classify_status(status, &headers, &body, &self.retry_statuses));
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map a failing response to a transient or permanent error.
///
/// Statuses listed in `retry_statuses` are transient; every other 4xx/5xx is
/// permanent. A `Retry-After` header is surfaced in the message.
pub fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
    retry_statuses: &[u16],
) -> ResilienceError {
    let excerpt: String = String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_BODY_EXCERPT)
        .collect();
    let mut message = format!("HTTP {}: {}", status, excerpt.trim());
    if let Some(retry_after) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
        message.push_str(&format!(" (retry after {retry_after})"));
    }

    let status_code = Some(status.as_u16());
    if retry_statuses.contains(&status.as_u16()) {
        ResilienceError::Transient {
            message,
            status_code,
        }
    } else {
        ResilienceError::Permanent {
            message,
            status_code,
        }
    }
}
