//! Clinic settings, check-in link and staff management

use axum::extract::State;

use crate::{
    api::{envelope::ApiResponse, extractors::ValidatedJson},
    auth::AuthenticatedPrincipal,
    models::{Clinic, User},
    services::{
        accounts::InviteStaffRequest,
        clinic::{CheckInLink, UpdateClinicRequest},
    },
    state::AppState,
    Result,
};

pub async fn get_clinic(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<ApiResponse<Clinic>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(state.clinics.get(clinic_id).await?))
}

/// Owner-only settings update.
pub async fn update_clinic(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    ValidatedJson(request): ValidatedJson<UpdateClinicRequest>,
) -> Result<ApiResponse<Clinic>> {
    let clinic_id = principal.require_owner()?;
    Ok(ApiResponse::ok(
        state.clinics.update_settings(clinic_id, request).await?,
    ))
}

/// URL the clinic prints as a QR code for self check-in.
pub async fn check_in_link(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<ApiResponse<CheckInLink>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(state.clinics.check_in_link(clinic_id).await?))
}

pub async fn list_staff(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<ApiResponse<Vec<User>>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(state.accounts.list_staff(clinic_id).await?))
}

pub async fn invite_staff(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    ValidatedJson(request): ValidatedJson<InviteStaffRequest>,
) -> Result<ApiResponse<User>> {
    let clinic_id = principal.require_owner()?;
    let user = state.accounts.invite_staff(clinic_id, request).await?;
    Ok(ApiResponse::created(user))
}
