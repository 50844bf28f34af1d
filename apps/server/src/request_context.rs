//! Per-request context injected by middleware.

use axum::http::HeaderMap;
use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Best-effort client address from `x-forwarded-for` / `x-real-ip`.
    pub client_ip: Option<IpAddr>,
}

/// First `x-forwarded-for` hop, else `x-real-ip`.
pub fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let first_hop = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    first_hop.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}
