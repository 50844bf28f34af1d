//! Per-client fixed-window rate limiting for public and auth routes

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    config::RateLimitConfig, metrics::HTTP_RATE_LIMITED_TOTAL, request_context::forwarded_ip,
    state::AppState, Error,
};

/// Windows are pruned once the table grows past this many clients.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<IpAddr, Window>>,
    enabled: bool,
    limit: u32,
    window: Duration,
    trusted_proxies: Arc<[IpAddr]>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            enabled: config.enabled,
            limit: config.requests_per_window.max(1),
            window: Duration::from_secs(config.window_seconds.max(1)),
            trusted_proxies: config.trusted_proxies.clone().into(),
        }
    }

    /// Count one request from `client`; `Err` carries the seconds until the window resets.
    pub fn check(&self, client: IpAddr) -> Result<(), u64> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> Result<(), u64> {
        if !self.enabled {
            return Ok(());
        }
        if self.windows.len() > PRUNE_THRESHOLD {
            let window = self.window;
            self.windows
                .retain(|_, w| now.duration_since(w.started) < window);
        }

        let mut entry = self.windows.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.duration_since(entry.started);
        if elapsed >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            let remaining = self.window.saturating_sub(now.duration_since(entry.started));
            return Err(remaining.as_secs().max(1));
        }
        entry.count += 1;
        Ok(())
    }

    /// Key for `req`: the socket peer, or the forwarded client when the
    /// peer is a trusted proxy.
    fn client_ip(&self, req: &Request) -> IpAddr {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        if self.trusted_proxies.contains(&peer) {
            forwarded_ip(req.headers()).unwrap_or(peer)
        } else {
            peer
        }
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let client = state.rate_limiter.client_ip(&req);
    match state.rate_limiter.check(client) {
        Ok(()) => next.run(req).await,
        Err(retry_after_seconds) => {
            let path = crate::metrics::sanitize_path(req.uri().path());
            HTTP_RATE_LIMITED_TOTAL.with_label_values(&[&path]).inc();
            tracing::warn!(client = %client, path = %path, "Rate limit exceeded");
            Error::RateLimited {
                retry_after_seconds,
            }
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_seconds: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            requests_per_window: limit,
            window_seconds,
            trusted_proxies: vec!["10.0.0.1".parse().unwrap()],
        })
    }

    fn request_from(peer: &str, forwarded: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/api/auth/login");
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut req = builder.body(axum::body::Body::empty()).unwrap();
        let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(2, 60);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let start = Instant::now();

        assert!(limiter.check_at(ip, start).is_ok());
        assert!(limiter.check_at(ip, start).is_ok());
        let retry = limiter.check_at(ip, start + Duration::from_secs(10)).unwrap_err();
        assert_eq!(retry, 50);

        // Other clients have their own window.
        assert!(limiter.check_at("10.0.0.2".parse().unwrap(), start).is_ok());

        assert!(limiter.check_at(ip, start + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn test_disabled_limiter_allows_everything() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: false,
            requests_per_window: 1,
            window_seconds: 60,
            trusted_proxies: Vec::new(),
        });
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..5 {
            assert!(limiter.check(ip).is_ok());
        }
    }

    #[test]
    fn test_untrusted_peer_keyed_on_socket_address() {
        let limiter = limiter(2, 60);
        let req = request_from("198.51.100.20", Some("203.0.113.9"));
        assert_eq!(
            limiter.client_ip(&req),
            "198.51.100.20".parse::<IpAddr>().unwrap()
        );

        let bare = Request::builder()
            .uri("/")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(limiter.client_ip(&bare), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_trusted_proxy_forwards_client() {
        let limiter = limiter(2, 60);
        let req = request_from("10.0.0.1", Some("203.0.113.9, 10.0.0.1"));
        assert_eq!(
            limiter.client_ip(&req),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );

        let without_header = request_from("10.0.0.1", None);
        assert_eq!(
            limiter.client_ip(&without_header),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );
    }
}
