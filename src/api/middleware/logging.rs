//! Request logging middleware

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct RequestLogging;

impl RequestLogging {
    /// Log method, path, status and duration of every API call.
    /// Query strings are left out since callers may put tokens there.
    pub async fn log_request(req: Request<Body>, next: Next) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let start = Instant::now();

        debug!(%method, %path, "request started");

        let response = next.run(req).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let status = response.status().as_u16();

        if response.status().is_server_error() {
            warn!(%method, %path, status, elapsed_ms, "request failed");
        } else {
            info!(%method, %path, status, elapsed_ms, "request finished");
        }

        response
    }
}
