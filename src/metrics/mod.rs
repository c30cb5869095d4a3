// Private module declaration
mod server;

use actix_web::http::StatusCode;
use prometheus::{
    exponential_buckets, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

// Re-export for public API
pub use server::internal_routes;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// One registry per process, built in main and injected into:
// - the request pipeline (HTTP request count, latency, sizes)
// - the proxy dispatcher (per-backend outcomes)
// - the internal server, which exposes everything on /metrics
//
// HTTP metrics are partitioned by (code, handler, method).
//
// ============================================================================

const HTTP_LABELS: &[&str] = &["code", "handler", "method"];

/// Central metrics registry for the process
pub struct Metrics {
    registry: Registry,

    // Request pipeline
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
    pub http_request_size: HistogramVec,
    pub http_response_size: HistogramVec,

    // Proxy dispatcher
    pub backend_requests_total: IntCounterVec,
}

impl Metrics {
    /// `prefix` names the build info metric, e.g. `remote_write_receiver`.
    pub fn new(prefix: &str) -> anyhow::Result<Self> {
        let registry = Registry::new();

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        let build_info = IntGaugeVec::new(
            Opts::new(
                format!("{}_build_info", prefix),
                "A metric with a constant '1' value labeled by version.",
            ),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Tracks the number of HTTP requests."),
            HTTP_LABELS,
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Tracks the latencies for HTTP requests.",
            )
            .buckets(vec![
                0.001, 0.01, 0.1, 0.3, 0.6, 1.0, 3.0, 6.0, 9.0, 20.0, 30.0, 60.0, 90.0, 120.0,
            ]),
            HTTP_LABELS,
        )?;
        registry.register(Box::new(http_request_duration.clone()))?;

        let http_request_size = HistogramVec::new(
            HistogramOpts::new("http_request_size_bytes", "Tracks the size of HTTP requests.")
                .buckets(exponential_buckets(64.0, 4.0, 10)?),
            HTTP_LABELS,
        )?;
        registry.register(Box::new(http_request_size.clone()))?;

        let http_response_size = HistogramVec::new(
            HistogramOpts::new("http_response_size_bytes", "Tracks the size of HTTP responses.")
                .buckets(exponential_buckets(64.0, 4.0, 10)?),
            HTTP_LABELS,
        )?;
        registry.register(Box::new(http_response_size.clone()))?;

        let backend_requests_total = IntCounterVec::new(
            Opts::new(
                "proxy_backend_requests_total",
                "Requests forwarded to each backend, by outcome.",
            ),
            &["backend", "outcome"],
        )?;
        registry.register(Box::new(backend_requests_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            http_request_size,
            http_response_size,
            backend_requests_total,
        })
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one completed HTTP request against its final status
    pub fn record_http_request(
        &self,
        handler: &str,
        method: &str,
        status: StatusCode,
        duration: Duration,
        request_size: usize,
        response_size: usize,
    ) {
        let labels = [status.as_str(), handler, method];
        self.http_requests_total.with_label_values(&labels).inc();
        self.http_request_duration
            .with_label_values(&labels)
            .observe(duration.as_secs_f64());
        self.http_request_size
            .with_label_values(&labels)
            .observe(request_size as f64);
        self.http_response_size
            .with_label_values(&labels)
            .observe(response_size as f64);
    }

    /// Record the outcome of one attempt against a backend
    pub fn record_backend_request(&self, backend: &str, outcome: &str) {
        self.backend_requests_total
            .with_label_values(&[backend, outcome])
            .inc();
    }

    /// Encode every registered metric in the text exposition format
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::counter_value;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new("remote_write_test").unwrap();
        let gathered = metrics.registry.gather();
        let build_info = gathered
            .iter()
            .find(|m| m.name() == "remote_write_test_build_info")
            .unwrap();
        assert_eq!(build_info.metric[0].gauge.value, Some(1.0));
    }

    #[test]
    fn test_record_http_request_partitions_by_code() {
        let metrics = Metrics::new("remote_write_test").unwrap();
        for _ in 0..3 {
            metrics.record_http_request("receive", "POST", StatusCode::OK, Duration::from_millis(5), 120, 0);
        }
        metrics.record_http_request(
            "receive",
            "POST",
            StatusCode::INTERNAL_SERVER_ERROR,
            Duration::from_millis(5),
            120,
            21,
        );

        let ok = counter_value(metrics.registry(), "http_requests_total", &[("code", "200"), ("handler", "receive")]);
        let failed = counter_value(metrics.registry(), "http_requests_total", &[("code", "500"), ("handler", "receive")]);
        assert_eq!(ok, Some(3.0));
        assert_eq!(failed, Some(1.0));
    }

    #[test]
    fn test_record_backend_request() {
        let metrics = Metrics::new("remote_write_test").unwrap();
        metrics.record_backend_request("http://10.0.0.1:8080", "success");
        metrics.record_backend_request("http://10.0.0.1:8080", "success");
        metrics.record_backend_request("http://10.0.0.2:8080", "error");

        let value = counter_value(
            metrics.registry(),
            "proxy_backend_requests_total",
            &[("backend", "http://10.0.0.1:8080"), ("outcome", "success")],
        );
        assert_eq!(value, Some(2.0));
    }

    #[test]
    fn test_encode_text_format() {
        let metrics = Metrics::new("remote_write_test").unwrap();
        metrics.record_http_request("receive", "POST", StatusCode::OK, Duration::from_millis(1), 10, 0);

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("http_requests_total{code=\"200\",handler=\"receive\",method=\"POST\"} 1"));
        assert!(text.contains("http_request_duration_seconds_bucket"));
    }
}
