//! Platform admin dashboard
//!
//! Routes are mounted behind `admin_middleware`, which only lets platform
//! admins through.

use axum::extract::{Path, Query, State};
use uuid::Uuid;

use crate::{
    api::{envelope::ApiResponse, extractors::JsonBody},
    models::{Clinic, Payment},
    services::{
        admin::{PaymentQuery, PlatformMetrics},
        clinic::AdminClinicUpdate,
    },
    state::AppState,
    Result,
};

pub async fn platform_metrics(State(state): State<AppState>) -> Result<ApiResponse<PlatformMetrics>> {
    Ok(ApiResponse::ok(state.admin.metrics().await?))
}

pub async fn list_clinics(State(state): State<AppState>) -> Result<ApiResponse<Vec<Clinic>>> {
    Ok(ApiResponse::ok(state.admin.list_clinics().await?))
}

/// Change a tenant's plan, subscription status or activation.
pub async fn update_clinic(
    State(state): State<AppState>,
    Path(clinic_id): Path<Uuid>,
    JsonBody(update): JsonBody<AdminClinicUpdate>,
) -> Result<ApiResponse<Clinic>> {
    Ok(ApiResponse::ok(
        state.admin.update_clinic(clinic_id, update).await?,
    ))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentQuery>,
) -> Result<ApiResponse<Vec<Payment>>> {
    Ok(ApiResponse::ok(state.admin.list_payments(&query).await?))
}
