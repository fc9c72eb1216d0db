//! Timing/logging decorator applied to every route
//!
//! Logs method and URI on entry and elapsed microseconds on exit, and
//! defaults the content type to JSON. Status, body and any content type the
//! handler chose are passed through untouched.

use std::time::Instant;

use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

/// Use with `axum::middleware::from_fn`.
pub async fn log_timing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    info!("Request {} {}", method, uri);

    let start = Instant::now();
    let mut response = next.run(request).await;

    response
        .headers_mut()
        .entry(CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/json"));

    let elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
    info!(
        %method,
        path = uri.path(),
        status = response.status().as_u16(),
        elapsed_us,
        "Response time {} μs",
        elapsed_us
    );
    response
}
