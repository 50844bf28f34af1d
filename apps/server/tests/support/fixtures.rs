//! Accounts and records most tests start from.

use anyhow::Context as _;
use clinicq_core::Role;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{assert_status, TestApp};
use axum::http::StatusCode;

/// A registered clinic and its owner's session.
pub struct Tenant {
    pub token: String,
    pub clinic_id: Uuid,
    pub slug: String,
}

pub fn uuid_of(value: &Value) -> anyhow::Result<Uuid> {
    value
        .as_str()
        .context("expected a string id")?
        .parse()
        .context("parse uuid")
}

impl TestApp {
    pub async fn register_clinic(&self, clinic_name: &str, email: &str) -> anyhow::Result<Tenant> {
        let response = self
            .post(
                "/api/auth/register",
                json!({
                    "clinicName": clinic_name,
                    "ownerName": "Owner",
                    "email": email,
                    "password": "correct-horse-battery",
                }),
                None,
            )
            .await?;
        assert_status(&response, StatusCode::CREATED, "register");

        let data = response.data();
        Ok(Tenant {
            token: data["token"].as_str().context("token")?.to_string(),
            clinic_id: uuid_of(&data["clinic"]["id"])?,
            slug: data["clinic"]["slug"].as_str().context("slug")?.to_string(),
        })
    }

    /// Token for a platform admin created directly through the service layer.
    pub async fn admin_token(&self) -> anyhow::Result<String> {
        let email = format!("admin-{}@clinicq.test", Uuid::new_v4().simple());
        let admin = self
            .state
            .accounts
            .create_platform_admin(&email, "Admin", "admin-password-123")
            .await?;
        assert_eq!(admin.role, Role::PlatformAdmin);
        Ok(self.state.tokens.issue(&admin)?)
    }

    pub async fn add_doctor(&self, token: &str, name: &str) -> anyhow::Result<Uuid> {
        let response = self
            .post("/api/doctors", json!({ "name": name }), Some(token))
            .await?;
        assert_status(&response, StatusCode::CREATED, "create doctor");
        uuid_of(&response.data()["id"])
    }

    /// Staff-side check-in; returns the new entry.
    pub async fn check_in(&self, token: &str, name: &str, phone: &str) -> anyhow::Result<Value> {
        let response = self
            .post(
                "/api/queue",
                json!({ "name": name, "phone": phone }),
                Some(token),
            )
            .await?;
        assert_status(&response, StatusCode::CREATED, "check in");
        Ok(response.data()["entry"].clone())
    }
}
