use super::{BoxedHandler, Handler, Middleware, Request, RequestContext, Response};
use actix_web::http::header::{HeaderName, HeaderValue};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// New request identifier: a UUIDv7, i.e. a millisecond timestamp followed
/// by random bits. Identifiers generated by one process sort in creation
/// order.
pub fn new_request_id() -> String {
    Uuid::now_v7().to_string()
}

pub(super) fn layer() -> Middleware {
    Box::new(|next| Arc::new(RequestId { next }))
}

struct RequestId {
    next: BoxedHandler,
}

#[async_trait(?Send)]
impl Handler for RequestId {
    async fn handle(&self, ctx: &mut RequestContext, mut req: Request) -> Response {
        let request_id = match req.header(REQUEST_ID_HEADER).filter(|id| !id.is_empty()) {
            Some(id) => id.to_owned(),
            None => {
                let id = new_request_id();
                if let Ok(value) = HeaderValue::from_str(&id) {
                    req.headers
                        .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
                }
                id
            }
        };

        ctx.span.record("request_id", request_id.as_str());
        ctx.request_id = request_id;

        let mut response = self.next.handle(ctx, req).await;

        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            response.set_header_if_absent(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::compose;
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_generated_ids_are_ordered_and_distinct() {
        let ids: Vec<String> = (0..1000).map(|_| new_request_id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[tokio::test]
    async fn test_back_to_back_requests_get_distinct_ids() {
        let recorder = Recorder::with_status(StatusCode::OK);
        let chain = compose(vec![layer()], recorder.clone());

        let first = chain.handle(&mut RequestContext::default(), post("/receive")).await;
        let second = chain.handle(&mut RequestContext::default(), post("/receive")).await;

        let seen = recorder.seen();
        assert_ne!(seen[0].request_id, seen[1].request_id);
        assert!(!seen[0].request_id.is_empty());
        assert_eq!(seen[0].header_request_id.as_deref(), Some(seen[0].request_id.as_str()));
        assert_eq!(first.header(REQUEST_ID_HEADER), Some(seen[0].request_id.as_str()));
        assert_eq!(second.header(REQUEST_ID_HEADER), Some(seen[1].request_id.as_str()));
    }

    #[tokio::test]
    async fn test_inbound_id_is_passed_through() {
        let recorder = Recorder::with_status(StatusCode::OK);
        let chain = compose(vec![layer()], recorder.clone());

        let mut req = post("/receive");
        req.headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderValue::from_static("upstream-7f3a"),
        );
        let mut ctx = RequestContext::default();
        let response = chain.handle(&mut ctx, req).await;

        assert_eq!(ctx.request_id, "upstream-7f3a");
        assert_eq!(recorder.seen()[0].request_id, "upstream-7f3a");
        assert_eq!(recorder.seen()[0].header_request_id.as_deref(), Some("upstream-7f3a"));
        assert_eq!(response.header(REQUEST_ID_HEADER), Some("upstream-7f3a"));
    }
}
