//! Request ID middleware with OpenTelemetry trace context injection

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use opentelemetry::trace::TraceContextExt;
use std::time::Instant;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

use crate::request_context::{forwarded_ip, RequestContext};

const REQUEST_ID: &str = "x-request-id";
const TRACE_ID: &str = "x-trace-id";
const CORRELATION_ID: &str = "x-correlation-id";

/// Opens the root span of every HTTP request.
///
/// The server always assigns its own `x-request-id`; a different id supplied
/// by the client is echoed back as `x-correlation-id`. The OpenTelemetry
/// trace id is returned as `x-trace-id`. `user_id` is filled in by the auth
/// middleware once the caller is known.
#[tracing::instrument(
    name = "http_request",
    skip_all,
    fields(
        http.method = %req.method(),
        http.route = %crate::metrics::sanitize_path(req.uri().path()),
        otel.kind = "server",
        http.response.status_code = tracing::field::Empty,
        request_id = tracing::field::Empty,
        user_id = tracing::field::Empty,
    )
)]
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let span = Span::current();
    let start = Instant::now();

    let client_id = req
        .headers()
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let server_id = Uuid::new_v4().to_string();
    span.record("request_id", server_id.as_str());
    let client_ip = forwarded_ip(req.headers());
    req.extensions_mut().insert(RequestContext {
        request_id: server_id.clone(),
        client_ip,
    });

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    tracing::debug!(method = %method, path = %path, "Incoming request");

    let mut response = next.run(req).await;

    let status = response.status();
    span.record("http.response.status_code", status.as_u16());
    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&server_id) {
        headers.insert(REQUEST_ID, value);
    }

    let trace_id = span.context().span().span_context().trace_id();
    if trace_id != opentelemetry::trace::TraceId::INVALID {
        if let Ok(value) = HeaderValue::from_str(&trace_id.to_string()) {
            headers.insert(TRACE_ID, value);
        }
    }

    if let Some(client_id) = client_id.filter(|id| *id != server_id) {
        if let Ok(value) = HeaderValue::from_str(&client_id) {
            headers.insert(CORRELATION_ID, value);
        }
    }

    response
}
