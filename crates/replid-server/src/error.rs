//! Structured error responses
//!
//! Every error leaving the API carries the shared
//! [`ErrorPayload`](replid_core::ErrorPayload) JSON body so callers can
//! tell error kinds apart without string-matching prose.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use replid_core::ErrorPayload;

/// Builds the error response for `status` with a structured body.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    let body = ErrorPayload::new(status.as_u16(), message);
    let serialized = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(Full::new(Bytes::from(serialized)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}
