//! Platform admin routes (mounted behind `admin_middleware`)

use crate::api::handlers::admin;
use crate::state::AppState;
use axum::{
    routing::{get, patch},
    Router,
};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/metrics", get(admin::platform_metrics))
        .route("/api/admin/clinics", get(admin::list_clinics))
        .route("/api/admin/clinics/:id", patch(admin::update_clinic))
        .route("/api/admin/payments", get(admin::list_payments))
}
