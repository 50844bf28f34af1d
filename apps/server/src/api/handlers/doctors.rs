//! Doctor roster and presence

use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::{
        envelope::ApiResponse,
        extractors::{JsonBody, ValidatedJson},
    },
    auth::AuthenticatedPrincipal,
    models::Doctor,
    services::doctor::{CreateDoctorRequest, PresenceRequest, UpdateDoctorRequest},
    state::AppState,
    Result,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_doctors(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Query(query): Query<DoctorQuery>,
) -> Result<ApiResponse<Vec<Doctor>>> {
    let clinic_id = principal.require_clinic()?;
    let doctors = state
        .doctors
        .list(clinic_id, query.include_inactive)
        .await?;
    Ok(ApiResponse::ok(doctors))
}

pub async fn create_doctor(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    ValidatedJson(request): ValidatedJson<CreateDoctorRequest>,
) -> Result<ApiResponse<Doctor>> {
    let clinic_id = principal.require_owner()?;
    Ok(ApiResponse::created(
        state.doctors.create(clinic_id, request).await?,
    ))
}

pub async fn update_doctor(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(doctor_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<UpdateDoctorRequest>,
) -> Result<ApiResponse<Doctor>> {
    let clinic_id = principal.require_owner()?;
    Ok(ApiResponse::ok(
        state.doctors.update(clinic_id, doctor_id, request).await?,
    ))
}

/// Deactivates the doctor; past appointments keep pointing at them.
pub async fn delete_doctor(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(doctor_id): Path<Uuid>,
) -> Result<ApiResponse<Doctor>> {
    let clinic_id = principal.require_owner()?;
    Ok(ApiResponse::ok(
        state.doctors.delete(clinic_id, doctor_id).await?,
    ))
}

/// Any staff member may toggle whether a doctor is seeing patients.
pub async fn set_presence(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(doctor_id): Path<Uuid>,
    JsonBody(request): JsonBody<PresenceRequest>,
) -> Result<ApiResponse<Doctor>> {
    let clinic_id = principal.require_clinic()?;
    let doctor = state
        .doctors
        .set_presence(clinic_id, doctor_id, request.available)
        .await?;
    Ok(ApiResponse::ok(doctor))
}
