//! HTTP client that sends every request through the resilience stack.

use crate::cache::CacheManager;
use crate::config::ResilienceConfig;
use crate::errors::{ResilienceError, ResilienceResult};
use crate::observability::{RequestTracer, ResilienceObserver};
use crate::resilience::{
    rate_limit_key, CircuitState, OrchestratorStats, RequestKeys, RequestOrchestrator,
    RequestOrchestratorBuilder, RetryHook,
};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::VERSION;
use bytes::Bytes;
use futures::future::join_all;
use http::header::{HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use http::{HeaderMap, Method};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

/// Overall health reported by [`ResilientClient::health_check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every known endpoint is accepting calls
    Healthy,
    /// At least one circuit is open or probing
    Degraded,
}

/// Health summary
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Endpoints whose circuit is not closed
    pub unavailable_endpoints: Vec<String>,
    /// Crate version
    pub version: &'static str,
}

/// Snapshot returned by [`ResilientClient::stats`]
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    /// Crate version
    pub version: &'static str,
    /// Counters from every layer
    #[serde(flatten)]
    pub layers: OrchestratorStats,
}

/// HTTP client wrapping a transport with rate limiting, circuit breaking,
/// retries and response caching.
///
/// Keys per request: the circuit breaker is per host (with port), the rate
/// limit bucket per host and path, and only GET/HEAD responses are cached,
/// keyed by method, full URL and the [`CACHE_VARY_HEADERS`].
///
/// Unless disabled, every request also carries trace headers from a
/// [`RequestTracer`].
pub struct ResilientClient {
    transport: Arc<dyn HttpTransport>,
    orchestrator: RequestOrchestrator<HttpResponse>,
    default_headers: HeaderMap,
    tracer: Option<RequestTracer>,
}

/// Request headers that select a different cached response
pub const CACHE_VARY_HEADERS: [HeaderName; 3] = [AUTHORIZATION, COOKIE, ACCEPT];

impl ResilientClient {
    /// Client over a `reqwest` transport
    pub fn new(config: ResilienceConfig) -> ResilienceResult<Self> {
        Self::builder().config(config).build()
    }

    /// Create a builder
    pub fn builder() -> ResilientClientBuilder {
        ResilientClientBuilder::default()
    }

    /// Orchestrator driving the layers
    pub fn orchestrator(&self) -> &RequestOrchestrator<HttpResponse> {
        &self.orchestrator
    }

    /// Send a request through every enabled layer
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: Option<HeaderMap>,
        body: Option<Bytes>,
    ) -> ResilienceResult<HttpResponse> {
        let url = Url::parse(url)?;
        let endpoint = endpoint_key(&url)?;
        let rate_key = rate_limit_key(&url);

        let mut request = HttpRequest::new(method, url).headers(self.default_headers.clone());
        if let Some(headers) = headers {
            request.headers.extend(headers);
        }
        request.body = body;

        let cache_key = request.is_cacheable().then(|| response_cache_key(&request));

        if let Some(tracer) = &self.tracer {
            let context = tracer.start(&request.headers);
            tracer.inject(&context, &mut request.headers);
        }

        let transport = Arc::clone(&self.transport);
        let request = Arc::new(request);
        let send = move || {
            let transport = Arc::clone(&transport);
            let request = Arc::clone(&request);
            async move { transport.execute_once(&request).await }
        };

        self.orchestrator
            .execute_keyed(
                RequestKeys::new(&endpoint)
                    .rate_limit(&rate_key)
                    .cache(cache_key.as_deref()),
                send,
                |response| Some(response.status.as_u16()),
            )
            .await
    }

    /// GET `url`
    pub async fn get(&self, url: &str) -> ResilienceResult<HttpResponse> {
        self.request(Method::GET, url, None, None).await
    }

    /// HEAD `url`
    pub async fn head(&self, url: &str) -> ResilienceResult<HttpResponse> {
        self.request(Method::HEAD, url, None, None).await
    }

    /// DELETE `url`
    pub async fn delete(&self, url: &str) -> ResilienceResult<HttpResponse> {
        self.request(Method::DELETE, url, None, None).await
    }

    /// POST `body` to `url`
    pub async fn post(&self, url: &str, body: impl Into<Bytes>) -> ResilienceResult<HttpResponse> {
        self.request(Method::POST, url, None, Some(body.into()))
            .await
    }

    /// PUT `body` to `url`
    pub async fn put(&self, url: &str, body: impl Into<Bytes>) -> ResilienceResult<HttpResponse> {
        self.request(Method::PUT, url, None, Some(body.into()))
            .await
    }

    /// PATCH `body` to `url`
    pub async fn patch(&self, url: &str, body: impl Into<Bytes>) -> ResilienceResult<HttpResponse> {
        self.request(Method::PATCH, url, None, Some(body.into()))
            .await
    }

    /// POST `value` serialized as JSON
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        value: &T,
    ) -> ResilienceResult<HttpResponse> {
        let body = serde_json::to_vec(value).map_err(|e| ResilienceError::Permanent {
            message: format!("Failed to serialize request body: {e}"),
            status_code: None,
        })?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.request(Method::POST, url, Some(headers), Some(Bytes::from(body)))
            .await
    }

    /// GET every URL concurrently; results keep the input order
    pub async fn batch_get(&self, urls: &[&str]) -> Vec<ResilienceResult<HttpResponse>> {
        join_all(urls.iter().map(|url| self.get(url))).await
    }

    /// Counters from every layer
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            version: VERSION,
            layers: self.orchestrator.stats(),
        }
    }

    /// Degraded while any endpoint's circuit is not closed
    pub fn health_check(&self) -> HealthReport {
        let unavailable_endpoints: Vec<String> = self
            .orchestrator
            .circuit_breakers()
            .map(|registry| {
                registry
                    .all_stats()
                    .into_iter()
                    .filter(|(_, stats)| stats.state != CircuitState::Closed)
                    .map(|(key, _)| key)
                    .collect()
            })
            .unwrap_or_default();

        HealthReport {
            status: if unavailable_endpoints.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            unavailable_endpoints,
            version: VERSION,
        }
    }
}

/// Cache key for a GET/HEAD request: method, URL and every vary header sent
pub fn response_cache_key(request: &HttpRequest) -> String {
    let mut parts = vec![request.method.to_string(), request.url.to_string()];
    for name in &CACHE_VARY_HEADERS {
        let values: Vec<_> = request
            .headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        if !values.is_empty() {
            parts.push(format!("{}={}", name, values.join(",")));
        }
    }
    let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
    CacheManager::<HttpResponse>::generate_key(&parts)
}

/// Circuit breaker key for a URL: host, with port when explicit
pub fn endpoint_key(url: &Url) -> ResilienceResult<String> {
    let host = url.host_str().ok_or_else(|| {
        ResilienceError::configuration(format!("URL has no host: {}", url))
    })?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Builder for [`ResilientClient`]
pub struct ResilientClientBuilder {
    config: ResilienceConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    observer: Option<Arc<dyn ResilienceObserver>>,
    retry_hook: Option<Arc<dyn RetryHook>>,
    default_headers: HeaderMap,
    tracer: Option<RequestTracer>,
}

impl Default for ResilientClientBuilder {
    fn default() -> Self {
        Self {
            config: ResilienceConfig::default(),
            transport: None,
            observer: None,
            retry_hook: None,
            default_headers: HeaderMap::new(),
            tracer: Some(RequestTracer::new()),
        }
    }
}

impl ResilientClientBuilder {
    /// Set the configuration
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom transport instead of `reqwest`
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attach an observer to every layer
    pub fn observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Consult `hook` before each retry
    pub fn retry_hook(mut self, hook: Arc<dyn RetryHook>) -> Self {
        self.retry_hook = Some(hook);
        self
    }

    /// Header sent with every request unless overridden per request
    pub fn default_header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Stamp trace headers with `tracer`
    pub fn tracer(mut self, tracer: RequestTracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Send requests without trace headers
    pub fn without_tracing(mut self) -> Self {
        self.tracer = None;
        self
    }

    /// Validate and build
    pub fn build(self) -> ResilienceResult<ResilientClient> {
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(None)?.retry_statuses(self.config.retry_statuses.clone()),
            ),
        };

        let mut orchestrator = RequestOrchestratorBuilder::new().config(self.config);
        if let Some(observer) = self.observer {
            orchestrator = orchestrator.observer(observer);
        }
        if let Some(hook) = self.retry_hook {
            orchestrator = orchestrator.retry_hook(hook);
        }

        Ok(ResilientClient {
            transport,
            orchestrator: orchestrator.build()?,
            default_headers: self.default_headers,
            tracer: self.tracer,
        })
    }
}
