//! Payment provider webhook receiver

use axum::{body::Bytes, extract::State, http::HeaderMap};

use crate::{
    api::envelope::ApiResponse,
    services::billing::{WebhookOutcome, SIGNATURE_HEADER},
    state::AppState,
    Result,
};

/// The signature covers the exact request bytes, so the body is taken raw.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<WebhookOutcome>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let outcome = state.billing.handle_webhook(&body, signature).await?;
    Ok(ApiResponse::ok(outcome))
}
