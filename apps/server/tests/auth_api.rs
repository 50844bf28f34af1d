//! Registration, login and role checks over HTTP

#[allow(unused)]
mod support;

use axum::http::StatusCode;
use serde_json::json;
use support::{assert_status, TestApp};

#[tokio::test]
async fn register_login_and_profile() -> anyhow::Result<()> {
    let app = TestApp::new();
    let tenant = app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;
    assert_eq!(tenant.slug, "sunny-clinic");

    let login = app
        .post(
            "/api/auth/login",
            json!({ "email": "OWNER@sunny.test", "password": "correct-horse-battery" }),
            None,
        )
        .await?;
    assert_status(&login, StatusCode::OK, "login");
    assert_eq!(login.body["success"], true);
    assert!(login.data()["user"].get("passwordHash").is_none());
    let token = login.data()["token"].as_str().unwrap().to_string();

    let me = app.get("/api/auth/me", Some(&token)).await?;
    assert_status(&me, StatusCode::OK, "me");
    assert_eq!(me.data()["user"]["email"], "owner@sunny.test");
    assert_eq!(me.data()["user"]["role"], "OWNER");
    assert_eq!(me.data()["clinic"]["slug"], "sunny-clinic");
    Ok(())
}

#[tokio::test]
async fn rejects_bad_credentials_and_missing_token() -> anyhow::Result<()> {
    let app = TestApp::new();
    app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;

    let wrong = app
        .post(
            "/api/auth/login",
            json!({ "email": "owner@sunny.test", "password": "wrong-password" }),
            None,
        )
        .await?;
    assert_status(&wrong, StatusCode::UNAUTHORIZED, "wrong password");
    assert_eq!(wrong.error_code(), "UNAUTHORIZED");
    assert_eq!(wrong.body["success"], false);

    let anonymous = app.get("/api/queue", None).await?;
    assert_status(&anonymous, StatusCode::UNAUTHORIZED, "no token");

    let forged = app.get("/api/queue", Some("not-a-jwt")).await?;
    assert_status(&forged, StatusCode::UNAUTHORIZED, "bad token");
    Ok(())
}

#[tokio::test]
async fn duplicate_slug_and_weak_password_are_rejected() -> anyhow::Result<()> {
    let app = TestApp::new();
    app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;

    let taken = app
        .post(
            "/api/auth/register",
            json!({
                "clinicName": "Sunny Clinic",
                "ownerName": "Someone",
                "email": "other@sunny.test",
                "password": "correct-horse-battery",
            }),
            None,
        )
        .await?;
    assert_status(&taken, StatusCode::CONFLICT, "duplicate slug");

    let weak = app
        .post(
            "/api/auth/register",
            json!({
                "clinicName": "Rainy Clinic",
                "ownerName": "Someone",
                "email": "rainy@clinic.test",
                "password": "short",
            }),
            None,
        )
        .await?;
    assert_status(&weak, StatusCode::BAD_REQUEST, "weak password");
    assert_eq!(weak.error_code(), "VALIDATION_ERROR");
    Ok(())
}

#[tokio::test]
async fn staff_cannot_change_clinic_settings() -> anyhow::Result<()> {
    let app = TestApp::new();
    let owner = app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;

    let invite = app
        .post(
            "/api/clinic/staff",
            json!({ "email": "desk@sunny.test", "name": "Front Desk", "password": "desk-password-1" }),
            Some(&owner.token),
        )
        .await?;
    assert_status(&invite, StatusCode::CREATED, "invite staff");
    assert_eq!(invite.data()["role"], "STAFF");

    let login = app
        .post(
            "/api/auth/login",
            json!({ "email": "desk@sunny.test", "password": "desk-password-1" }),
            None,
        )
        .await?;
    let staff_token = login.data()["token"].as_str().unwrap().to_string();

    let patch = app
        .patch("/api/clinic", json!({ "name": "Renamed" }), Some(&staff_token))
        .await?;
    assert_status(&patch, StatusCode::FORBIDDEN, "staff settings update");

    // Staff still run the queue.
    app.check_in(&staff_token, "Ada", "+15550001111").await?;

    let staff = app.get("/api/clinic/staff", Some(&owner.token)).await?;
    assert_eq!(staff.data().as_array().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn owner_updates_settings_and_gets_check_in_link() -> anyhow::Result<()> {
    let app = TestApp::new();
    let owner = app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;

    let patch = app
        .patch(
            "/api/clinic",
            json!({ "openingTime": "08:00:00", "closingTime": "12:00:00", "slotMinutes": 20 }),
            Some(&owner.token),
        )
        .await?;
    assert_status(&patch, StatusCode::OK, "settings");
    assert_eq!(patch.data()["slotMinutes"], 20);

    let backwards = app
        .patch(
            "/api/clinic",
            json!({ "openingTime": "18:00:00", "closingTime": "09:00:00" }),
            Some(&owner.token),
        )
        .await?;
    assert_status(&backwards, StatusCode::BAD_REQUEST, "closing before opening");

    let link = app.get("/api/clinic/check-in-link", Some(&owner.token)).await?;
    assert_status(&link, StatusCode::OK, "check-in link");
    assert_eq!(
        link.data()["url"],
        "https://clinicq.test/check-in/sunny-clinic"
    );
    Ok(())
}
