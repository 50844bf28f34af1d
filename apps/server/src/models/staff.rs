use chrono::{DateTime, Utc};
use clinicq_core::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A login: platform admin (no clinic) or clinic owner/staff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub clinic_id: Option<Uuid>,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub specialty: Option<String>,
    /// Presence toggle shown on the clinic board.
    pub is_available: bool,
    /// Soft-delete flag.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
