//! Trace propagation headers for outbound requests.
//!
//! Every request carries `X-Trace-Id`, `X-Span-Id` and a W3C `traceparent`
//! header. A caller that already sends a `traceparent` keeps its trace; the
//! request gets a fresh span under it.

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use rand::Rng;

/// `X-Trace-Id` header
pub const TRACE_ID_HEADER: &str = "x-trace-id";
/// `X-Span-Id` header
pub const SPAN_ID_HEADER: &str = "x-span-id";
/// `X-Parent-Span-Id` header
pub const PARENT_SPAN_ID_HEADER: &str = "x-parent-span-id";
/// `X-Service-Name` header
pub const SERVICE_NAME_HEADER: &str = "x-service-name";
/// W3C Trace Context header
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Identifiers of one span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// 32 lowercase hex characters, shared by the whole trace
    pub trace_id: String,
    /// 16 lowercase hex characters
    pub span_id: String,
    /// Span this one was started under
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    /// Root span of a new trace
    pub fn new() -> Self {
        Self {
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            parent_span_id: None,
        }
    }

    /// New span in the same trace, parented to this one
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: generate_span_id(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }

    /// `traceparent` value: `00-{trace_id}-{span_id}-01`
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }

    /// Context carried by `headers`, from `traceparent` when valid,
    /// otherwise from `X-Trace-Id`/`X-Span-Id`.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        if let Some(parsed) = value(TRACEPARENT_HEADER).and_then(parse_traceparent) {
            return Some(parsed);
        }

        let trace_id = value(TRACE_ID_HEADER)?;
        let span_id = value(SPAN_ID_HEADER)?;
        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: value(PARENT_SPAN_ID_HEADER).map(str::to_string),
        })
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Stamps trace headers on outbound requests.
#[derive(Debug, Clone, Default)]
pub struct RequestTracer {
    service_name: Option<HeaderValue>,
}

impl RequestTracer {
    /// Tracer without a service name
    pub fn new() -> Self {
        Self::default()
    }

    /// Also send `X-Service-Name`. Names that are not valid header values
    /// are ignored.
    pub fn with_service_name(mut self, name: &str) -> Self {
        self.service_name = HeaderValue::from_str(name).ok();
        self
    }

    /// Span for a request with `headers`: a child of the caller's trace if
    /// the headers carry one, otherwise a new root
    pub fn start(&self, headers: &HeaderMap) -> TraceContext {
        TraceContext::from_headers(headers)
            .map(|parent| parent.child())
            .unwrap_or_default()
    }

    /// Write `context` into `headers`, replacing earlier trace headers
    pub fn inject(&self, context: &TraceContext, headers: &mut HeaderMap) {
        headers.remove(PARENT_SPAN_ID_HEADER);

        let mut insert = |name: &'static str, value: &str| {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        };
        insert(TRACE_ID_HEADER, &context.trace_id);
        insert(SPAN_ID_HEADER, &context.span_id);
        insert(TRACEPARENT_HEADER, &context.traceparent());
        if let Some(parent) = &context.parent_span_id {
            insert(PARENT_SPAN_ID_HEADER, parent);
        }

        if let Some(service) = &self.service_name {
            headers.insert(HeaderName::from_static(SERVICE_NAME_HEADER), service.clone());
        }
    }
}

fn parse_traceparent(value: &str) -> Option<TraceContext> {
    let mut parts = value.trim().split('-');
    let (version, trace_id, span_id, _flags) =
        (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    let is_hex = |s: &str, len: usize| {
        s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit()) && s.bytes().any(|b| b != b'0')
    };
    if version.len() != 2 || !is_hex(trace_id, 32) || !is_hex(span_id, 16) {
        return None;
    }
    Some(TraceContext {
        trace_id: trace_id.to_ascii_lowercase(),
        span_id: span_id.to_ascii_lowercase(),
        parent_span_id: None,
    })
}

fn generate_trace_id() -> String {
    format!("{:032x}", rand::thread_rng().gen_range(1..=u128::MAX))
}

fn generate_span_id() -> String {
    format!("{:016x}", rand::thread_rng().gen_range(1..=u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_context_ids() {
        let context = TraceContext::new();
        assert_eq!(context.trace_id.len(), 32);
        assert_eq!(context.span_id.len(), 16);
        assert!(context.parent_span_id.is_none());
        assert_ne!(TraceContext::new().trace_id, context.trace_id);
    }

    #[test]
    fn test_inject_writes_every_header() {
        let tracer = RequestTracer::new().with_service_name("billing");
        let context = TraceContext::new();
        let mut headers = HeaderMap::new();

        tracer.inject(&context, &mut headers);

        assert_eq!(headers[TRACE_ID_HEADER], context.trace_id.as_str());
        assert_eq!(headers[SPAN_ID_HEADER], context.span_id.as_str());
        assert_eq!(headers[TRACEPARENT_HEADER], context.traceparent().as_str());
        assert_eq!(headers[SERVICE_NAME_HEADER], "billing");
        assert!(headers.get(PARENT_SPAN_ID_HEADER).is_none());
    }

    #[test]
    fn test_start_continues_incoming_trace() {
        let tracer = RequestTracer::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            TRACEPARENT_HEADER,
            HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
        );

        let context = tracer.start(&headers);

        assert_eq!(context.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(context.parent_span_id.as_deref(), Some("00f067aa0ba902b7"));
        assert_ne!(context.span_id, "00f067aa0ba902b7");
    }

    #[test]
    fn test_malformed_traceparent_starts_new_trace() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT_HEADER, HeaderValue::from_static("00-zz-11-01"));
        assert!(TraceContext::from_headers(&headers).is_none());

        let context = RequestTracer::new().start(&headers);
        assert!(context.parent_span_id.is_none());
    }
}
