use super::{BoxedHandler, Handler, Middleware, Request, RequestContext, Response};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

// ============================================================================
// Trace Context Propagation (W3C Trace Context)
// ============================================================================
//
// Inbound:  `traceparent: 00-<trace-id>-<parent-id>-<flags>` and `baggage`
// Server:   one `http_request` span per request, child of the remote parent
//           when present, otherwise a new root
// Outbound: `SpanContext::to_traceparent` for the server span, so the proxy
//           can hand the context to its backends
//
// ============================================================================

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const BAGGAGE_HEADER: &str = "baggage";

const SAMPLED_FLAG: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub flags: u8,
}

impl SpanContext {
    /// Parse a `traceparent` header value. Malformed values and all-zero
    /// ids yield `None`.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || version.eq_ignore_ascii_case("ff") {
            return None;
        }
        u8::from_str_radix(version, 16).ok()?;
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return None;
        }

        let context = SpanContext {
            trace_id: u128::from_str_radix(trace_id, 16).ok()?,
            span_id: u64::from_str_radix(span_id, 16).ok()?,
            flags: u8::from_str_radix(flags, 16).ok()?,
        };

        if context.trace_id == 0 || context.span_id == 0 {
            return None;
        }
        Some(context)
    }

    pub fn to_traceparent(&self) -> String {
        format!("00-{:032x}-{:016x}-{:02x}", self.trace_id, self.span_id, self.flags)
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & SAMPLED_FLAG != 0
    }
}

/// Trace state of the current server span.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub span: SpanContext,
    pub remote_parent: Option<SpanContext>,
    pub baggage: Vec<(String, String)>,
}

impl TraceContext {
    /// Start a server span under `remote_parent`, or a new root.
    pub fn start(remote_parent: Option<SpanContext>, baggage: Vec<(String, String)>) -> Self {
        let span = match remote_parent {
            Some(parent) => SpanContext {
                trace_id: parent.trace_id,
                span_id: new_span_id(),
                flags: parent.flags,
            },
            None => SpanContext {
                trace_id: Uuid::new_v4().as_u128(),
                span_id: new_span_id(),
                flags: SAMPLED_FLAG,
            },
        };

        Self {
            span,
            remote_parent,
            baggage,
        }
    }

    pub fn extract(req: &Request) -> Self {
        let remote_parent = req
            .header(TRACEPARENT_HEADER)
            .and_then(SpanContext::from_traceparent);
        let baggage = req.header(BAGGAGE_HEADER).map(parse_baggage).unwrap_or_default();
        Self::start(remote_parent, baggage)
    }
}

struct TraceId(u128);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

struct SpanId(u64);

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

fn new_span_id() -> u64 {
    // The v4 variant bits keep the low half non-zero.
    Uuid::new_v4().as_u128() as u64
}

/// `k1=v1,k2=v2;prop` -> [(k1, v1), (k2, v2)]; entry properties are dropped.
fn parse_baggage(value: &str) -> Vec<(String, String)> {
    value
        .split(',')
        .filter_map(|entry| {
            let member = entry.split(';').next()?;
            let (key, value) = member.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_owned(), value.trim().to_owned()))
        })
        .collect()
}

pub(super) fn layer(name: &'static str) -> Middleware {
    let operation = format!("/{} HTTP[server]", name);
    Box::new(move |next| Arc::new(Trace { operation, next }))
}

struct Trace {
    operation: String,
    next: BoxedHandler,
}

#[async_trait(?Send)]
impl Handler for Trace {
    async fn handle(&self, ctx: &mut RequestContext, req: Request) -> Response {
        let trace = TraceContext::extract(&req);

        let span = tracing::info_span!(
            "http_request",
            otel.name = %self.operation,
            trace_id = %TraceId(trace.span.trace_id),
            span_id = %SpanId(trace.span.span_id),
            parent_span_id = tracing::field::Empty,
            sampled = trace.span.is_sampled(),
            request_id = tracing::field::Empty,
            http.method = %req.method,
            http.target = %req.uri,
        );
        if let Some(parent) = trace.remote_parent {
            span.record("parent_span_id", tracing::field::display(SpanId(parent.span_id)));
        }
        tracing::debug!(parent: &span, baggage = ?trace.baggage, "{}", self.operation);

        let previous_span = std::mem::replace(&mut ctx.span, span.clone());
        let previous_trace = ctx.trace.replace(trace);

        let response = self.next.handle(ctx, req).instrument(span).await;

        // Dropping the last clone closes the span.
        ctx.trace = previous_trace;
        ctx.span = previous_span;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::compose;
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};
    use actix_web::http::StatusCode;

    const PARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_traceparent() {
        let context = SpanContext::from_traceparent(PARENT).unwrap();
        assert_eq!(context.trace_id, 0x4bf92f3577b34da6a3ce929d0e0e4736);
        assert_eq!(context.span_id, 0x00f067aa0ba902b7);
        assert!(context.is_sampled());
        assert_eq!(context.to_traceparent(), PARENT);
    }

    #[test]
    fn test_reject_malformed_traceparent() {
        for value in [
            "",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4bf92f3577b34da6a3ce929d0e0e473-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "00-zzf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        ] {
            assert_eq!(SpanContext::from_traceparent(value), None, "{:?}", value);
        }
    }

    #[test]
    fn test_parse_baggage() {
        let baggage = parse_baggage("tenant=team-a, region = eu-west-1;ttl=30,=skip,broken");
        assert_eq!(
            baggage,
            vec![
                ("tenant".to_string(), "team-a".to_string()),
                ("region".to_string(), "eu-west-1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_child_span_of_remote_parent() {
        let recorder = Recorder::with_status(StatusCode::OK);
        let chain = compose(vec![layer("receive")], recorder.clone());

        let mut req = post("/receive");
        req.headers.insert(
            HeaderName::from_static(TRACEPARENT_HEADER),
            HeaderValue::from_static(PARENT),
        );
        req.headers.insert(
            HeaderName::from_static(BAGGAGE_HEADER),
            HeaderValue::from_static("tenant=team-a"),
        );
        let mut ctx = RequestContext::default();
        chain.handle(&mut ctx, req).await;

        let trace = recorder.seen()[0].trace.clone().unwrap();
        let parent = SpanContext::from_traceparent(PARENT).unwrap();
        assert_eq!(trace.remote_parent, Some(parent));
        assert_eq!(trace.span.trace_id, parent.trace_id);
        assert_ne!(trace.span.span_id, parent.span_id);
        assert_eq!(trace.baggage, vec![("tenant".to_string(), "team-a".to_string())]);

        // Context is released once the layer returns.
        assert!(ctx.trace.is_none());
    }

    #[tokio::test]
    async fn test_new_root_without_remote_parent() {
        let recorder = Recorder::with_status(StatusCode::OK);
        let chain = compose(vec![layer("receive")], recorder.clone());

        chain.handle(&mut RequestContext::default(), post("/receive")).await;
        chain.handle(&mut RequestContext::default(), post("/receive")).await;

        let seen = recorder.seen();
        let first = seen[0].trace.clone().unwrap();
        let second = seen[1].trace.clone().unwrap();
        assert!(first.remote_parent.is_none());
        assert_ne!(first.span.trace_id, second.span.trace_id);
        assert!(first.span.is_sampled());
    }
}
