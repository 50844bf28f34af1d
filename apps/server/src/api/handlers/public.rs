//! Unauthenticated patient-facing endpoints
//!
//! Patients reach these through the clinic's QR code. They only ever see
//! the clinic's public profile and their own queue entry.

use axum::{
    extract::{Path, State},
    Extension,
};
use clinicq_core::EntryId;

use crate::{
    api::{envelope::ApiResponse, extractors::ValidatedJson},
    request_context::RequestContext,
    services::{
        clinic::PublicClinic,
        queue::{CheckInChannel, CheckInRequest, PatientView, QueueTicket},
    },
    state::AppState,
    Result,
};

pub async fn clinic_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<ApiResponse<PublicClinic>> {
    Ok(ApiResponse::ok(state.clinics.public_by_slug(&slug).await?))
}

/// Self check-in from the clinic's QR code.
pub async fn self_check_in(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    context: Option<Extension<RequestContext>>,
    ValidatedJson(request): ValidatedJson<CheckInRequest>,
) -> Result<ApiResponse<QueueTicket>> {
    let clinic = state.clinics.by_slug(&slug).await?;
    let ticket = state
        .queue
        .check_in(clinic.id, request, CheckInChannel::Public)
        .await?;

    if let Some(Extension(context)) = context {
        tracing::info!(
            clinic_id = %clinic.id,
            entry_id = %ticket.entry.id,
            request_id = %context.request_id,
            client_ip = ?context.client_ip,
            "Public check-in"
        );
    }
    Ok(ApiResponse::created(ticket))
}

/// The patient's own status page, keyed by the unguessable entry id.
pub async fn patient_view(
    State(state): State<AppState>,
    Path(entry_id): Path<EntryId>,
) -> Result<ApiResponse<PatientView>> {
    Ok(ApiResponse::ok(state.queue.patient_view(entry_id).await?))
}
