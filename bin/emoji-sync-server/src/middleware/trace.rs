//! Per-request trace id and access log.

use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

pub static X_TRACE_ID: &str = "x-trace-id";

/// Runs the request inside an `http_request` span keyed by the caller's
/// `x-trace-id` (or a fresh one) and echoes the id on the response.
pub async fn trace_middleware(mut req: Request<Body>, next: Next) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        // A hyphenated uuid is always a valid header value.
        let header = HeaderValue::from_str(&trace_id.to_string()).ok();
        if let Some(value) = &header {
            req.headers_mut().insert(X_TRACE_ID, value.clone());
        }

        let mut response = next.run(req).await;

        if let Some(value) = header {
            response.headers_mut().insert(X_TRACE_ID, value);
        }
        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "request finished"
        );
        response
    }
    .instrument(span)
    .await
}
