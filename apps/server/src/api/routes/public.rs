//! Unauthenticated routes

use crate::api::handlers::{accounts, public, webhooks};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

/// Read-only patient pages and the signed webhook receiver.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/public/clinics/:slug", get(public::clinic_by_slug))
        .route("/api/public/queue/:entry_id", get(public::patient_view))
        .route("/api/webhooks/payments", post(webhooks::payment_webhook))
}

/// Writes an anonymous caller can trigger; mounted behind the rate limiter.
pub fn rate_limited_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(accounts::register))
        .route("/api/auth/login", post(accounts::login))
        .route(
            "/api/public/clinics/:slug/check-in",
            post(public::self_check_in),
        )
}
