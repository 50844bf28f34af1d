//! API layer - routes, handlers, and middleware

pub mod envelope;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;

use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_request_body_size;
    let cors_origins = state.config.server.cors_origins.clone();

    let staff_router = routes::staff::staff_routes().layer(
        axum::middleware::from_fn_with_state(state.clone(), crate::auth::auth_middleware),
    );
    let admin_router = routes::admin::admin_routes().layer(
        axum::middleware::from_fn_with_state(state.clone(), crate::auth::admin_middleware),
    );
    let limited_router = routes::public::rate_limited_routes().layer(
        axum::middleware::from_fn_with_state(state.clone(), middleware::rate_limit_middleware),
    );

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Root endpoint
        .route("/", get(root))
        // Favicon handler (returns 204 to prevent 404 logs)
        .route("/favicon.ico", get(favicon))
        // Realtime queue updates; the token travels in the query string
        .route("/ws", get(crate::realtime::ws_handler))
        // Metrics endpoint
        .merge(routes::metrics::metrics_routes())
        .merge(routes::public::public_routes())
        .merge(limited_router)
        .merge(staff_router)
        .merge(admin_router)
        // Add state
        .with_state(state)
        // Add middleware (applied in reverse order)
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn(middleware::metrics_middleware))
        .layer(middleware::compression())
        .layer(middleware::cors(&cors_origins))
        .layer(middleware::trace())
        // Limit request body size to prevent DoS via large payloads
        .layer(DefaultBodyLimit::max(max_body_size))
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "clinicq"
    }))
}

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "server": "clinicq",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": state.store.backend(),
            "status": "running"
        })),
    )
}

async fn favicon() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
