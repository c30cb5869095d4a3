mod round_robin;

pub use round_robin::RoundRobinDispatcher;

use crate::pipeline::{Handler, HandlerError, Request, RequestContext, Response, TRACEPARENT_HEADER};
use crate::utils::IsTransient;
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::Method;
use actix_web::web::Bytes;
use async_trait::async_trait;
use std::sync::Arc;

// ============================================================================
// Dispatcher Boundary - terminal handler of the proxy role
// ============================================================================
//
// The proxy does not rewrite requests. `ForwardHandler` buffers the body,
// stamps the outbound trace context and hands everything to a `Dispatcher`,
// which picks a backend and returns its response unchanged.
//
// Dispatch failures are ordinary request failures: 502, logged and counted
// by the surrounding pipeline.
//
// ============================================================================

/// A request as handed to a backend.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no backends configured")]
    NoBackends,

    #[error("all backends unavailable")]
    AllUnavailable,

    #[error("backend {backend} unavailable: circuit open")]
    CircuitOpen { backend: String },

    #[error("backend {backend}: {source}")]
    Transport {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot forward to {backend}: {reason}")]
    InvalidRequest { backend: String, reason: String },
}

impl IsTransient for DispatchError {
    fn is_transient(&self) -> bool {
        match self {
            DispatchError::AllUnavailable | DispatchError::CircuitOpen { .. } => true,
            DispatchError::Transport { source, .. } => source.is_connect() || source.is_timeout(),
            DispatchError::NoBackends | DispatchError::InvalidRequest { .. } => false,
        }
    }
}

/// Backend selection and forwarding. Shared by every in-flight request.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn forward(&self, req: ForwardRequest) -> Result<Response, DispatchError>;
}

pub struct ForwardHandler {
    dispatcher: Arc<dyn Dispatcher>,
}

impl ForwardHandler {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }

    async fn forward(&self, ctx: &RequestContext, req: Request) -> Result<Response, HandlerError> {
        let body = req.body.read_to_end().await.map_err(HandlerError::Read)?;

        let mut headers = req.headers;
        if let Some(trace) = &ctx.trace {
            if let Ok(value) = HeaderValue::from_str(&trace.span.to_traceparent()) {
                headers.insert(HeaderName::from_static(TRACEPARENT_HEADER), value);
            }
        }

        let path_and_query = req
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_owned();

        let response = self
            .dispatcher
            .forward(ForwardRequest {
                method: req.method,
                path_and_query,
                headers,
                body,
            })
            .await?;
        Ok(response)
    }
}

#[async_trait(?Send)]
impl Handler for ForwardHandler {
    async fn handle(&self, ctx: &mut RequestContext, req: Request) -> Response {
        match self.forward(ctx, req).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    request = %ctx.request_id,
                    cause = %err.cause(),
                    error = %err,
                    "forward failed"
                );
                err.into()
            }
        }
    }
}
