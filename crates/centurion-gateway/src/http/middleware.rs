//! Correlation/request-id propagation, grounded in
//! `common/middleware/logging.py`'s `LoggingMiddleware` from the original
//! implementation: read `x-request-id`/`x-correlation-id` from the inbound
//! request (generating one if absent), echo both back on the response, and
//! log the request at `info` with them as structured fields.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// `axum::middleware::from_fn` target, applied directly in `app::build_router`.
pub async fn correlation_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let correlation_id = req
        .headers()
        .get(&CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| request_id.clone());

    if let Ok(v) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&correlation_id) {
        req.headers_mut().insert(CORRELATION_ID_HEADER, v.clone());
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(req).await;

    let duration_ms = started.elapsed().as_millis();
    let status = response.status().as_u16();
    info!(
        %request_id,
        %correlation_id,
        %method,
        %path,
        status,
        duration_ms,
        "request.completed"
    );

    if let Ok(v) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, v);
    }

    response
}
