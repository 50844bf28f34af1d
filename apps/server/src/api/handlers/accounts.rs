//! Registration, login and the current user's profile

use axum::extract::State;

use crate::{
    api::{envelope::ApiResponse, extractors::ValidatedJson},
    auth::AuthenticatedPrincipal,
    services::accounts::{LoginRequest, Profile, RegisterRequest, Session},
    state::AppState,
    Result,
};

/// Create a clinic together with its owner account.
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> Result<ApiResponse<Session>> {
    let session = state.accounts.register(request).await?;
    Ok(ApiResponse::created(session))
}

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<ApiResponse<Session>> {
    Ok(ApiResponse::ok(state.accounts.login(request).await?))
}

pub async fn me(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<ApiResponse<Profile>> {
    Ok(ApiResponse::ok(state.accounts.me(&principal).await?))
}
