//! Staff queue operations
//!
//! Every mutation goes through [`QueueService`](crate::services::QueueService),
//! which renumbers the queue and broadcasts the new order to the clinic room.

use axum::extract::{Path, Query, State};
use clinicq_core::{EntryId, QueueStatus, WaitStats};
use serde::Deserialize;

use crate::{
    api::{
        envelope::ApiResponse,
        extractors::{JsonBody, ValidatedJson},
    },
    auth::AuthenticatedPrincipal,
    models::{EntryFilter, QueueEntry},
    services::queue::{CheckInChannel, CheckInRequest, QueueTicket},
    state::AppState,
    Result,
};

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: QueueStatus,
}

#[derive(Debug, Deserialize)]
pub struct PositionUpdate {
    pub position: i32,
}

pub async fn list_queue(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Query(filter): Query<EntryFilter>,
) -> Result<ApiResponse<Vec<QueueEntry>>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(state.queue.list(clinic_id, &filter).await?))
}

/// Walk-in registered at the front desk.
pub async fn check_in(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    ValidatedJson(request): ValidatedJson<CheckInRequest>,
) -> Result<ApiResponse<QueueTicket>> {
    let clinic_id = principal.require_clinic()?;
    let ticket = state
        .queue
        .check_in(clinic_id, request, CheckInChannel::Staff)
        .await?;
    Ok(ApiResponse::created(ticket))
}

pub async fn stats(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<ApiResponse<WaitStats>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(state.queue.stats(clinic_id).await?))
}

/// Moves the head of the queue into consultation. `data` is null when the queue is empty.
pub async fn call_next(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<ApiResponse<Option<QueueEntry>>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(state.queue.call_next(clinic_id).await?))
}

pub async fn get_entry(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(entry_id): Path<EntryId>,
) -> Result<ApiResponse<QueueTicket>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(state.queue.get(clinic_id, entry_id).await?))
}

pub async fn remove_entry(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(entry_id): Path<EntryId>,
) -> Result<ApiResponse<QueueEntry>> {
    let clinic_id = principal.require_clinic()?;
    Ok(ApiResponse::ok(state.queue.remove(clinic_id, entry_id).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(entry_id): Path<EntryId>,
    JsonBody(update): JsonBody<StatusUpdate>,
) -> Result<ApiResponse<QueueEntry>> {
    let clinic_id = principal.require_clinic()?;
    let entry = state
        .queue
        .update_status(clinic_id, entry_id, update.status)
        .await?;
    Ok(ApiResponse::ok(entry))
}

pub async fn reorder(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(entry_id): Path<EntryId>,
    JsonBody(update): JsonBody<PositionUpdate>,
) -> Result<ApiResponse<QueueEntry>> {
    let clinic_id = principal.require_clinic()?;
    let entry = state
        .queue
        .reorder(clinic_id, entry_id, update.position)
        .await?;
    Ok(ApiResponse::ok(entry))
}
