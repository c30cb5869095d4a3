use super::{Body, BoxedHandler, Request, RequestContext};
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt;
use std::io;

/// Run an actix-web request through a composed pipeline.
///
/// ```ignore
/// cfg.route("/receive", web::post().to(move |req: HttpRequest, payload: web::Payload| {
///     pipeline::serve(handler.clone(), req, payload)
/// }));
/// ```
pub async fn serve(handler: BoxedHandler, req: HttpRequest, payload: web::Payload) -> HttpResponse {
    let body = Body::from_stream(payload.map_err(|e| io::Error::other(e.to_string())));
    let request = Request {
        method: req.method().clone(),
        uri: req.uri().clone(),
        version: req.version(),
        headers: req.headers().clone(),
        body,
    };

    let mut ctx = RequestContext::default();
    let response = handler.handle(&mut ctx, request).await;

    let mut builder = HttpResponse::build(response.status);
    for (name, value) in response.headers.iter() {
        builder.append_header((name.clone(), value.clone()));
    }
    builder.body(response.body)
}
