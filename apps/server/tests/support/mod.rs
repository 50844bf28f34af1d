//! Test harness: the full router over an in-memory store.

pub mod fixtures;

use anyhow::Context as _;
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode},
    Router,
};
use clinicq::{api::create_router, db::MemoryStore, AppState, Config};
use axum::extract::ConnectInfo;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt as _;

pub use fixtures::*;

pub const JWT_SECRET: &str = "integration-test-secret";
pub const WEBHOOK_SECRET: &str = "whsec_integration";
/// Socket address requests arrive from unless a test picks another.
pub const DEFAULT_PEER: &str = "192.0.2.10:40000";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

/// Decoded response: status, headers and the JSON body (`Null` when empty).
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// `data` of a success envelope.
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    /// `error.code` of a failure envelope.
    pub fn error_code(&self) -> &str {
        self.body["error"]["code"].as_str().unwrap_or_default()
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.auth.jwt_secret = JWT_SECRET.to_string();
        config.billing.webhook_secret = WEBHOOK_SECRET.to_string();
        config.server.public_base_url = "https://clinicq.test".to_string();
        config.rate_limit.enabled = false;
        config.workers.enabled = false;
        configure(&mut config);

        let state = AppState::with_store(config, Arc::new(MemoryStore::new()));
        let router = create_router(state.clone());
        Self { router, state }
    }

    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> anyhow::Result<TestResponse> {
        let body = match body {
            Some(value) => Bytes::from(serde_json::to_vec(&value)?),
            None => Bytes::new(),
        };
        let mut headers = vec![("content-type", "application/json".to_string())];
        if let Some(token) = token {
            headers.push(("authorization", format!("Bearer {token}")));
        }
        self.raw_request(method, path_and_query, body, &headers).await
    }

    pub async fn raw_request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Bytes,
        extra_headers: &[(&str, String)],
    ) -> anyhow::Result<TestResponse> {
        self.raw_request_from(DEFAULT_PEER, method, path_and_query, body, extra_headers)
            .await
    }

    /// Like [`raw_request`](Self::raw_request), arriving from socket address `peer`.
    pub async fn raw_request_from(
        &self,
        peer: &str,
        method: Method,
        path_and_query: &str,
        body: Bytes,
        extra_headers: &[(&str, String)],
    ) -> anyhow::Result<TestResponse> {
        let peer: SocketAddr = peer.parse().context("parse peer address")?;
        let mut request = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header(header::HOST, "clinicq.test")
            .body(Body::from(body))
            .context("build request")?;
        request.extensions_mut().insert(ConnectInfo(peer));

        for (name, value) in extra_headers {
            request.headers_mut().insert(
                name.parse::<HeaderName>().context("parse header name")?,
                value.parse::<HeaderValue>().context("parse header value")?,
            );
        }

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("dispatch request")?;

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("read response body")?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).context("parse response JSON")?
        };

        Ok(TestResponse {
            status,
            headers,
            body,
        })
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> anyhow::Result<TestResponse> {
        self.request(Method::GET, path, None, token).await
    }

    pub async fn post(&self, path: &str, body: Value, token: Option<&str>) -> anyhow::Result<TestResponse> {
        self.request(Method::POST, path, Some(body), token).await
    }

    pub async fn patch(&self, path: &str, body: Value, token: Option<&str>) -> anyhow::Result<TestResponse> {
        self.request(Method::PATCH, path, Some(body), token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> anyhow::Result<TestResponse> {
        self.request(Method::DELETE, path, None, token).await
    }
}

#[track_caller]
pub fn assert_status(response: &TestResponse, expected: StatusCode, context: &str) {
    assert_eq!(
        response.status, expected,
        "{context}: unexpected status, body: {}",
        response.body
    );
}
