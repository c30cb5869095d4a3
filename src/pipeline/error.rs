use super::Response;
use crate::proxy::DispatchError;
use crate::receiver::DecodeError;
use actix_web::http::StatusCode;

// ============================================================================
// Request-level Errors
// ============================================================================
//
// Contained at the request boundary: each maps to a response status and a
// short cause used in logs. None of them affects other requests.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("read request body: {0}")]
    Read(#[source] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("forward request: {0}")]
    Dispatch(#[from] DispatchError),
}

impl HandlerError {
    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::Read(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HandlerError::Decode(_) => StatusCode::BAD_REQUEST,
            HandlerError::Dispatch(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn cause(&self) -> &'static str {
        match self {
            HandlerError::Read(_) => "read",
            HandlerError::Decode(DecodeError::Snappy(_)) => "decode",
            HandlerError::Decode(DecodeError::Protobuf(_)) => "unmarshal",
            HandlerError::Dispatch(_) => "dispatch",
        }
    }
}

impl From<HandlerError> for Response {
    fn from(err: HandlerError) -> Self {
        Response::text(err.status(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_cause() {
        let read = HandlerError::Read(std::io::Error::other("connection reset"));
        assert_eq!(read.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(read.cause(), "read");

        let decode = HandlerError::from(DecodeError::Snappy(snap::Error::Empty));
        assert_eq!(decode.status(), StatusCode::BAD_REQUEST);
        assert_eq!(decode.cause(), "decode");

        let dispatch = HandlerError::from(DispatchError::NoBackends);
        assert_eq!(dispatch.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(dispatch.cause(), "dispatch");
    }

    #[test]
    fn test_into_plain_text_response() {
        let response = Response::from(HandlerError::Read(std::io::Error::other("reset")));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(response.body, "read request body: reset");
    }
}
