//! Transport collaborator: one HTTP exchange, no resilience.
//!
//! The resilience layers only need [`HttpTransport::execute_once`] and the
//! transient/permanent split of its errors.

mod http_transport;

pub use http_transport::{classify_status, ReqwestTransport};

use crate::errors::{ResilienceError, ResilienceResult};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

/// Executes a single HTTP exchange.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request` once.
    ///
    /// Statuses the transport considers transient must come back as
    /// [`ResilienceError::Transient`]; other failing statuses as
    /// [`ResilienceError::Permanent`].
    async fn execute_once(&self, request: &HttpRequest) -> ResilienceResult<HttpResponse>;
}

/// Outbound request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Request with no headers or body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Add a header, rejecting invalid names or values
    pub fn header(mut self, name: &str, value: &str) -> ResilienceResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            ResilienceError::configuration(format!("invalid header name '{name}': {e}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            ResilienceError::configuration(format!("invalid value for header '{name}': {e}"))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Replace all headers
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Only safe, idempotent reads are cached
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

/// Response received from the transport
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Full body
    pub body: Bytes,
}

impl HttpResponse {
    /// Response with no headers
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// True for 2xx
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body as UTF-8, invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> ResilienceResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| ResilienceError::Permanent {
            message: format!("Invalid JSON response body: {e}"),
            status_code: Some(self.status.as_u16()),
        })
    }
}
