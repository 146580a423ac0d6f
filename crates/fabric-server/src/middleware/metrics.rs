//! Metrics hook: records a request counter and latency per `(method, path,
//! status)` via `tracing`, not a specific exporter wire format — scraping
//! and aggregation are a deployment concern, not this crate's.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

pub async fn record_metrics(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let start = Instant::now();
    let response = next.run(req).await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}
