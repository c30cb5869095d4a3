// ============================================================================
// Request Pipeline
// ============================================================================
//
// Every public route runs through the same middleware chain before reaching
// its terminal handler. Outer to inner:
//
//   metrics -> trace -> request_id -> logging -> terminal handler
//
// - metrics    sees end-to-end latency and the final status, panics included
// - trace      opens the server span that request_id and logging read
// - request_id stamps the identifier onto the request and the context
// - logging    writes one record per request after the handler returns
//
// A middleware is a function from the next handler to a new handler; the
// chain is built once at startup by folding the list over the terminal
// handler. Per-request values travel in an explicit `RequestContext`, so a
// handler can be called directly in tests with a context built by hand.
//
// ============================================================================

mod adapter;
mod error;
mod logging;
mod metrics;
mod request_id;
mod trace;

pub use adapter::serve;
pub use error::HandlerError;
pub use trace::{TraceContext, TRACEPARENT_HEADER};

#[cfg(test)]
pub use request_id::REQUEST_ID_HEADER;
#[cfg(test)]
pub use trace::SpanContext;

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use actix_web::http::{Method, StatusCode, Uri, Version};
use actix_web::web::Bytes;
use async_trait::async_trait;
use futures_util::stream::{LocalBoxStream, StreamExt};
use std::io;
use std::sync::Arc;

use crate::metrics::Metrics;

/// Request body as a stream of chunks.
pub struct Body {
    stream: LocalBoxStream<'static, io::Result<Bytes>>,
}

impl Body {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: futures_util::Stream<Item = io::Result<Bytes>> + 'static,
    {
        Self {
            stream: stream.boxed_local(),
        }
    }

    #[cfg(test)]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::from_stream(futures_util::stream::once(futures_util::future::ready(Ok(bytes.into()))))
    }

    #[cfg(test)]
    pub fn empty() -> Self {
        Self::from_stream(futures_util::stream::empty())
    }

    /// Collect the whole body.
    pub async fn read_to_end(mut self) -> io::Result<Bytes> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buffer))
    }
}

pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Request {
    #[cfg(test)]
    pub fn new(method: Method, uri: Uri, body: Body) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Plain-text response, as written by error paths.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.body = Bytes::from(body.into());
        response
    }

    #[cfg(test)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    fn set_header_if_absent(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.headers.contains_key(&name) {
            self.headers.insert(name, value);
        }
    }
}

/// Per-request values shared along the chain.
pub struct RequestContext {
    /// Empty until the request-id layer has run.
    pub request_id: String,
    pub trace: Option<TraceContext>,
    pub span: tracing::Span,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            request_id: String::new(),
            trace: None,
            span: tracing::Span::none(),
        }
    }
}

/// One step of request handling. Terminal handlers and middleware both
/// implement it.
#[async_trait(?Send)]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext, req: Request) -> Response;
}

pub type BoxedHandler = Arc<dyn Handler>;

/// Wraps the next handler into a new handler.
pub type Middleware = Box<dyn FnOnce(BoxedHandler) -> BoxedHandler>;

/// Apply `layers` (listed outermost first) around `terminal`.
pub fn compose(layers: Vec<Middleware>, terminal: BoxedHandler) -> BoxedHandler {
    layers
        .into_iter()
        .rev()
        .fold(terminal, |next, layer| layer(next))
}

/// The standard instrumented chain for a named route.
pub fn instrumented(
    name: &'static str,
    metrics: Arc<Metrics>,
    terminal: BoxedHandler,
) -> BoxedHandler {
    compose(
        vec![
            metrics::layer(name, metrics),
            trace::layer(name),
            request_id::layer(),
            logging::layer(),
        ],
        terminal,
    )
}
