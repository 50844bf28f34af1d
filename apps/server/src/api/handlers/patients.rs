//! Patient records

use axum::extract::{Path, Query, State};
use uuid::Uuid;

use crate::{
    api::{envelope::ApiResponse, extractors::ValidatedJson},
    auth::AuthenticatedPrincipal,
    models::Patient,
    services::patient::{CreatePatientRequest, PatientQuery, UpdatePatientRequest},
    state::AppState,
    Result,
};

pub async fn list_patients(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Query(query): Query<PatientQuery>,
) -> Result<ApiResponse<Vec<Patient>>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(state.patients.list(clinic_id, &query).await?))
}

pub async fn create_patient(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    ValidatedJson(request): ValidatedJson<CreatePatientRequest>,
) -> Result<ApiResponse<Patient>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::created(
        state.patients.create(clinic_id, request).await?,
    ))
}

pub async fn get_patient(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(patient_id): Path<Uuid>,
) -> Result<ApiResponse<Patient>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(state.patients.get(clinic_id, patient_id).await?))
}

pub async fn update_patient(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(patient_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<UpdatePatientRequest>,
) -> Result<ApiResponse<Patient>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(
        state.patients.update(clinic_id, patient_id, request).await?,
    ))
}
