mod prompb;

pub use prompb::{DecodeError, WriteRequest};

use prompb::{decompress, unmarshal};

#[cfg(test)]
pub(crate) use prompb::{encode, series};

use crate::pipeline::{Handler, HandlerError, Request, RequestContext, Response};
use actix_web::http::StatusCode;
use async_trait::async_trait;
use tracing::Instrument;

// ============================================================================
// Receive Handler - terminal handler of the receiver role
// ============================================================================
//
// read body -> snappy decode -> protobuf unmarshal -> log every series
//
// Each step runs in its own span. The first failure short-circuits: nothing
// is logged for a payload that did not fully decode.
//
// ============================================================================

#[derive(Debug, Default)]
pub struct ReceiveHandler;

impl ReceiveHandler {
    pub fn new() -> Self {
        Self
    }
}

async fn receive(req: Request) -> Result<WriteRequest, HandlerError> {
    let compressed = req
        .body
        .read_to_end()
        .instrument(tracing::debug_span!("read"))
        .await
        .map_err(HandlerError::Read)?;

    let raw = tracing::debug_span!("decode").in_scope(|| decompress(&compressed))?;
    let write = tracing::debug_span!("unmarshal").in_scope(|| unmarshal(&raw))?;
    Ok(write)
}

fn log_series(request_id: &str, write: &WriteRequest) {
    for ts in &write.timeseries {
        tracing::info!(request = %request_id, "{}", ts.metric());
        for sample in &ts.samples {
            tracing::info!(request = %request_id, "  {:.6} {}", sample.value, sample.timestamp);
        }
    }
}

#[async_trait(?Send)]
impl Handler for ReceiveHandler {
    async fn handle(&self, ctx: &mut RequestContext, req: Request) -> Response {
        match receive(req).await {
            Ok(write) => {
                log_series(&ctx.request_id, &write);
                Response::new(StatusCode::OK)
            }
            Err(err) => {
                tracing::warn!(
                    request = %ctx.request_id,
                    cause = %err.cause(),
                    error = %err,
                    "receive failed"
                );
                err.into()
            }
        }
    }
}
