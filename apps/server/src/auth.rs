//! Authentication / Authorization primitives.
//!
//! The server issues its own HS256 access tokens at login and validates them
//! on every protected request. Role checks live on [`Principal`].

use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use clinicq_core::Role;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::AuthConfig, models::User, state::AppState, Error, Result};

/// JWT claims carried by clinicq access tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_id: Option<Uuid>,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

/// The authenticated caller, attached to request extensions by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: Uuid,
    pub clinic_id: Option<Uuid>,
    pub role: Role,
}

impl Principal {
    /// The caller's clinic; platform admins have none and are refused.
    pub fn require_clinic(&self) -> Result<Uuid> {
        self.clinic_id
            .ok_or_else(|| Error::Forbidden("This action requires a clinic account".to_string()))
    }

    pub fn require_owner(&self) -> Result<Uuid> {
        let clinic_id = self.require_clinic()?;
        if !self.role.can_manage_clinic() {
            return Err(Error::Forbidden(
                "Only the clinic owner can perform this action".to_string(),
            ));
        }
        Ok(clinic_id)
    }

    pub fn require_platform_admin(&self) -> Result<()> {
        match self.role {
            Role::PlatformAdmin => Ok(()),
            _ => Err(Error::Forbidden("Platform admin access required".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken(String),
}

impl AuthError {
    fn diagnostics(&self) -> String {
        match self {
            Self::MissingToken => "Missing bearer token".to_string(),
            Self::InvalidToken(msg) => format!("Invalid bearer token: {msg}"),
        }
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Unauthorized(err.diagnostics())
    }
}

/// Issues and validates HS256 access tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);
        validation.leeway = 30;

        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            ttl: Duration::minutes(config.token_ttl_minutes),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        self.issue_for(user.id, user.clinic_id, user.role)
    }

    pub fn issue_for(&self, user_id: Uuid, clinic_id: Option<Uuid>, role: Role) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            clinic_id,
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> std::result::Result<Principal, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;
        if claims.role != Role::PlatformAdmin && claims.clinic_id.is_none() {
            return Err(AuthError::InvalidToken(
                "clinic role without clinic_id".to_string(),
            ));
        }
        Ok(Principal {
            user_id: claims.sub,
            clinic_id: claims.clinic_id,
            role: claims.role,
        })
    }

    pub fn authenticate_headers(
        &self,
        headers: &HeaderMap,
    ) -> std::result::Result<Principal, AuthError> {
        let authz = headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?
            .to_str()
            .map_err(|_| {
                AuthError::InvalidToken("Authorization header is not valid UTF-8".to_string())
            })?;

        let token = authz
            .strip_prefix("Bearer ")
            .or_else(|| authz.strip_prefix("bearer "))
            .ok_or_else(|| {
                AuthError::InvalidToken("Authorization header must be 'Bearer <token>'".to_string())
            })?;

        self.verify(token.trim())
    }
}

/// Extractor for the authenticated principal attached by middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal(pub Principal);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthenticatedPrincipal)
            .ok_or_else(|| Error::from(AuthError::MissingToken).into_response())
    }
}

/// Middleware for attaching `Principal` (or rejecting) on protected routes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    if req.method() == axum::http::Method::OPTIONS {
        return next.run(req).await;
    }

    match state.tokens.authenticate_headers(req.headers()) {
        Ok(principal) => {
            tracing::Span::current().record("user_id", tracing::field::display(principal.user_id));
            req.extensions_mut().insert::<Principal>(principal);
            next.run(req).await
        }
        Err(err) => {
            tracing::debug!(error = %err.diagnostics(), "Rejected unauthenticated request");
            Error::from(err).into_response()
        }
    }
}

/// Like [`auth_middleware`], but only platform admins get through.
pub async fn admin_middleware(
    State(state): State<AppState>,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let principal = match state.tokens.authenticate_headers(req.headers()) {
        Ok(principal) => principal,
        Err(err) => return Error::from(err).into_response(),
    };
    if let Err(err) = principal.require_platform_admin() {
        tracing::warn!(user_id = %principal.user_id, "Non-admin attempted admin access");
        return err.into_response();
    }

    tracing::Span::current().record("user_id", tracing::field::display(principal.user_id));
    req.extensions_mut().insert::<Principal>(principal);
    next.run(req).await
}
