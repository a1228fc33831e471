//! Request tracing middleware.
//!
//! Gives every request an ID, echoes it back, and wraps the handler in a
//! span carrying it. Jobs started by the request record the same ID.

use axum::{
    body::Body,
    http::{header::HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Longest client-supplied request ID that is accepted as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Request ID stored in request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

fn incoming_request_id(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
}

/// Middleware that extracts or generates a request ID.
pub async fn trace_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = incoming_request_id(&req).unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let start = std::time::Instant::now();
    let mut response = next.run(req).instrument(span).await;

    tracing::info!(
        request_id = %request_id,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), header_value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_request_id_bounds() {
        let req = Request::builder()
            .header(REQUEST_ID_HEADER, "abc-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(incoming_request_id(&req).as_deref(), Some("abc-123"));

        let req = Request::builder()
            .header(REQUEST_ID_HEADER, "x".repeat(MAX_REQUEST_ID_LEN + 1))
            .body(Body::empty())
            .unwrap();
        assert!(incoming_request_id(&req).is_none());

        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(incoming_request_id(&req).is_none());
    }
}
