use super::{BoxedHandler, Handler, Middleware, Request, RequestContext, Response};
use crate::metrics::Metrics;
use actix_web::http::header::CONTENT_LENGTH;
use actix_web::http::StatusCode;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

pub(super) fn layer(handler: &'static str, metrics: Arc<Metrics>) -> Middleware {
    Box::new(move |next| {
        Arc::new(Instrumented {
            handler,
            metrics,
            next,
        })
    })
}

/// Outermost layer: observes after the whole chain has produced its final
/// status. A panic anywhere inside is answered and counted as a 500.
struct Instrumented {
    handler: &'static str,
    metrics: Arc<Metrics>,
    next: BoxedHandler,
}

#[async_trait(?Send)]
impl Handler for Instrumented {
    async fn handle(&self, ctx: &mut RequestContext, req: Request) -> Response {
        let start = Instant::now();
        let method = req.method.clone();
        let request_size = approximate_request_size(&req);

        let response = match AssertUnwindSafe(self.next.handle(ctx, req))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                tracing::error!(handler = self.handler, "request handler panicked");
                Response::text(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        };

        self.metrics.record_http_request(
            self.handler,
            method.as_str(),
            response.status,
            start.elapsed(),
            request_size,
            response.body.len(),
        );
        response
    }
}

/// Request line, headers and declared content length, without reading the
/// body.
fn approximate_request_size(req: &Request) -> usize {
    let headers = req
        .headers
        .iter()
        .fold(0usize, |total, (name, value)| {
            total.saturating_add(name.as_str().len() + value.len())
        });
    // Client controlled; may be anything up to u64::MAX.
    let content_length = req
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map_or(0, |length| usize::try_from(length).unwrap_or(usize::MAX));

    (req.uri.to_string().len() + req.method.as_str().len() + format!("{:?}", req.version).len())
        .saturating_add(headers)
        .saturating_add(content_length)
}
