use super::{DispatchError, Dispatcher, ForwardRequest};
use crate::metrics::Metrics;
use crate::pipeline::Response;
use crate::utils::{
    retry_on_transient, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, RetryPolicy,
};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Headers that describe a single connection and never cross the proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    // Recomputed by the client and by the server for each hop.
    "host",
    "content-length",
];

struct Backend {
    base_url: String,
    breaker: CircuitBreaker,
}

/// Round-robin over a fixed backend list. Backends with an open circuit are
/// skipped; transient failures are retried on the next backend in turn.
pub struct RoundRobinDispatcher {
    client: reqwest::Client,
    backends: Vec<Backend>,
    cursor: AtomicUsize,
    retry: RetryPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl RoundRobinDispatcher {
    pub fn new(backends: Vec<String>, timeout: Duration) -> anyhow::Result<Self> {
        Self::with_policies(backends, timeout, CircuitBreakerConfig::default(), RetryPolicy::default())
    }

    pub fn with_policies(
        backends: Vec<String>,
        timeout: Duration,
        breaker: CircuitBreakerConfig,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create backend client: {}", e))?;

        let backends = backends
            .into_iter()
            .map(|url| {
                let base_url = url.trim_end_matches('/').to_owned();
                Backend {
                    breaker: CircuitBreaker::new(base_url.as_str(), breaker.clone()),
                    base_url,
                }
            })
            .collect();

        Ok(Self {
            client,
            backends,
            cursor: AtomicUsize::new(0),
            retry,
            metrics: None,
        })
    }

    /// Count per-backend outcomes in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Next backend in turn whose circuit admits a request.
    async fn next_backend(&self) -> Option<&Backend> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.backends.len() {
            let backend = &self.backends[(start + offset) % self.backends.len()];
            if backend.breaker.allows_request().await {
                return Some(backend);
            }
            let state = backend.breaker.state().await;
            tracing::debug!(backend = %backend.base_url, state = ?state, "skipping backend");
        }
        None
    }

    async fn attempt(&self, req: &ForwardRequest, attempt: u32) -> Result<Response, DispatchError> {
        let backend = self.next_backend().await.ok_or(DispatchError::AllUnavailable)?;
        tracing::debug!(backend = %backend.base_url, attempt, "forwarding request");

        match backend.breaker.call(self.send(backend, req)).await {
            Ok(response) => {
                self.record(backend, "success");
                Ok(response)
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                self.record(backend, "rejected");
                Err(DispatchError::CircuitOpen {
                    backend: backend.base_url.clone(),
                })
            }
            Err(CircuitBreakerError::OperationFailed(err)) => {
                self.record(backend, "error");
                Err(err)
            }
        }
    }

    async fn send(&self, backend: &Backend, req: &ForwardRequest) -> Result<Response, DispatchError> {
        let method = reqwest::Method::from_bytes(req.method.as_str().as_bytes()).map_err(|e| {
            DispatchError::InvalidRequest {
                backend: backend.base_url.clone(),
                reason: e.to_string(),
            }
        })?;
        let url = format!("{}{}", backend.base_url, req.path_and_query);

        let mut outbound = reqwest::header::HeaderMap::new();
        for (name, value) in forwardable(&req.headers) {
            let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes());
            let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes());
            if let (Ok(name), Ok(value)) = (name, value) {
                outbound.append(name, value);
            }
        }

        let transport = |source| DispatchError::Transport {
            backend: backend.base_url.clone(),
            source,
        };

        let upstream = self
            .client
            .request(method, url)
            .headers(outbound)
            .body(req.body.clone())
            .send()
            .await
            .map_err(transport)?;

        let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut headers = HeaderMap::new();
        for (name, value) in upstream.headers() {
            let name = HeaderName::from_bytes(name.as_str().as_bytes());
            let value = HeaderValue::from_bytes(value.as_bytes());
            if let (Ok(name), Ok(value)) = (name, value) {
                headers.append(name, value);
            }
        }
        let body = upstream.bytes().await.map_err(transport)?;

        let mut response = Response::new(status);
        for (name, value) in forwardable(&headers) {
            response.headers.append(name.clone(), value.clone());
        }
        response.body = body;
        Ok(response)
    }

    fn record(&self, backend: &Backend, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_backend_request(&backend.base_url, outcome);
        }
    }
}

fn forwardable(headers: &HeaderMap) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
}

#[async_trait]
impl Dispatcher for RoundRobinDispatcher {
    async fn forward(&self, req: ForwardRequest) -> Result<Response, DispatchError> {
        if self.backends.is_empty() {
            return Err(DispatchError::NoBackends);
        }
        let req = &req;
        retry_on_transient(&self.retry, move |attempt| self.attempt(req, attempt)).await
    }
}
