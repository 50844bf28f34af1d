//! Metrics middleware - tracks HTTP request metrics

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{
    sanitize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS,
};

/// Count requests and observe their latency, labelled by method and id-free path.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = sanitize_path(req.uri().path());

    // WebSocket upgrades stay open for the life of the socket.
    let is_upgrade = req.headers().contains_key("upgrade");
    if !is_upgrade {
        HTTP_REQUESTS_IN_FLIGHT
            .with_label_values(&[&method, &path])
            .inc();
    }

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(start.elapsed().as_secs_f64());

    if !is_upgrade {
        HTTP_REQUESTS_IN_FLIGHT
            .with_label_values(&[&method, &path])
            .dec();
    }

    response
}
