use super::{BoxedHandler, Handler, Middleware, Request, RequestContext, Response};
use actix_web::http::header::CONTENT_TYPE;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

pub(super) fn layer() -> Middleware {
    Box::new(|next| Arc::new(AccessLog { next }))
}

/// One record per request. 5xx logs at warn, everything else at debug.
struct AccessLog {
    next: BoxedHandler,
}

#[async_trait(?Send)]
impl Handler for AccessLog {
    async fn handle(&self, ctx: &mut RequestContext, req: Request) -> Response {
        let start = Instant::now();
        let proto = req.version;
        let method = req.method.clone();
        let path = req.uri.path().to_owned();
        let content_type = req.header(CONTENT_TYPE.as_str()).unwrap_or_default().to_owned();

        let response = self.next.handle(ctx, req).await;

        let status = response.status.as_u16();
        let duration = start.elapsed();
        let bytes = response.body.len();

        if response.status.is_server_error() {
            tracing::warn!(
                request = %ctx.request_id,
                proto = ?proto,
                method = %method,
                status,
                content_type = %content_type,
                path = %path,
                duration = ?duration,
                bytes,
                "request handled"
            );
        } else {
            tracing::debug!(
                request = %ctx.request_id,
                proto = ?proto,
                method = %method,
                status,
                content_type = %content_type,
                path = %path,
                duration = ?duration,
                bytes,
                "request handled"
            );
        }

        response
    }
}
