//! Appointment booking and the daily slot grid

use axum::extract::{Path, Query, State};
use chrono::NaiveDate;
use clinicq_core::AppointmentStatus;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::{
        envelope::ApiResponse,
        extractors::{JsonBody, ValidatedJson},
    },
    auth::AuthenticatedPrincipal,
    models::{Appointment, AppointmentFilter},
    services::appointment::{BookAppointmentRequest, RescheduleRequest, SlotList},
    state::AppState,
    Result,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotQuery {
    pub doctor_id: Uuid,
    /// Clinic-local calendar day.
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentStatusUpdate {
    pub status: AppointmentStatus,
}

pub async fn list_appointments(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Query(filter): Query<AppointmentFilter>,
) -> Result<ApiResponse<Vec<Appointment>>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(
        state.appointments.list(clinic_id, &filter).await?,
    ))
}

pub async fn book_appointment(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    ValidatedJson(request): ValidatedJson<BookAppointmentRequest>,
) -> Result<ApiResponse<Appointment>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::created(
        state.appointments.book(clinic_id, request).await?,
    ))
}

pub async fn available_slots(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Query(query): Query<SlotQuery>,
) -> Result<ApiResponse<SlotList>> {
    let clinic_id = principal.require_clinic()?;
    let slots = state
        .appointments
        .available_slots(clinic_id, query.doctor_id, query.date)
        .await?;
    Ok(ApiResponse::ok(slots))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(appointment_id): Path<Uuid>,
) -> Result<ApiResponse<Appointment>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(
        state.appointments.get(clinic_id, appointment_id).await?,
    ))
}

pub async fn reschedule_appointment(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(appointment_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<RescheduleRequest>,
) -> Result<ApiResponse<Appointment>> {
    let clinic_id = principal.require_clinic()?;
    let appointment = state
        .appointments
        .reschedule(clinic_id, appointment_id, request)
        .await?;
    Ok(ApiResponse::ok(appointment))
}

pub async fn update_appointment_status(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(appointment_id): Path<Uuid>,
    JsonBody(update): JsonBody<AppointmentStatusUpdate>,
) -> Result<ApiResponse<Appointment>> {
    let clinic_id = principal.require_clinic()?;
    let appointment = state
        .appointments
        .update_status(clinic_id, appointment_id, update.status)
        .await?;
    Ok(ApiResponse::ok(appointment))
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(appointment_id): Path<Uuid>,
) -> Result<ApiResponse<Appointment>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(
        state.appointments.cancel(clinic_id, appointment_id).await?,
    ))
}
