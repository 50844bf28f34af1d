//! Signed payment webhooks

#[allow(unused)]
mod support;

use axum::http::{Method, StatusCode};
use clinicq::services::billing::{sign, SIGNATURE_HEADER};
use serde_json::{json, Value};
use support::{assert_status, TestApp, TestResponse, WEBHOOK_SECRET};

async fn deliver(app: &TestApp, payload: &Value, secret: &str) -> anyhow::Result<TestResponse> {
    let body = serde_json::to_vec(payload)?;
    let signature = sign(secret, &body)?;
    app.raw_request(
        Method::POST,
        "/api/webhooks/payments",
        body.into(),
        &[
            ("content-type", "application/json".to_string()),
            (SIGNATURE_HEADER, signature),
        ],
    )
    .await
}

#[tokio::test]
async fn payment_upgrades_plan_once() -> anyhow::Result<()> {
    let app = TestApp::new();
    let tenant = app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;
    let payload = json!({
        "id": "evt_001",
        "type": "payment.succeeded",
        "data": { "clinicId": tenant.clinic_id, "amount": "49.00", "currency": "usd", "plan": "PRO" }
    });

    let first = deliver(&app, &payload, WEBHOOK_SECRET).await?;
    assert_status(&first, StatusCode::OK, "first delivery");
    assert_eq!(first.data()["status"], "processed");

    let replay = deliver(&app, &payload, WEBHOOK_SECRET).await?;
    assert_status(&replay, StatusCode::OK, "replay");
    assert_eq!(replay.data()["status"], "duplicate");

    let clinic = app.get("/api/clinic", Some(&tenant.token)).await?;
    assert_eq!(clinic.data()["plan"], "PRO");
    assert_eq!(clinic.data()["subscriptionStatus"], "ACTIVE");
    Ok(())
}

#[tokio::test]
async fn rejects_unsigned_and_forged_deliveries() -> anyhow::Result<()> {
    let app = TestApp::new();
    let tenant = app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;
    let payload = json!({
        "id": "evt_002",
        "type": "payment.succeeded",
        "data": { "clinicId": tenant.clinic_id, "amount": 49, "plan": "PRO" }
    });

    let forged = deliver(&app, &payload, "not-the-secret").await?;
    assert_status(&forged, StatusCode::UNAUTHORIZED, "forged signature");

    let unsigned = app
        .post("/api/webhooks/payments", payload.clone(), None)
        .await?;
    assert_status(&unsigned, StatusCode::UNAUTHORIZED, "missing signature");

    let clinic = app.get("/api/clinic", Some(&tenant.token)).await?;
    assert_eq!(clinic.data()["plan"], "FREE");
    Ok(())
}

#[tokio::test]
async fn failure_then_cancellation() -> anyhow::Result<()> {
    let app = TestApp::new();
    let tenant = app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;

    let failed = deliver(
        &app,
        &json!({
            "id": "evt_010",
            "type": "payment.failed",
            "data": { "clinicId": tenant.clinic_id, "amount": "49.00" }
        }),
        WEBHOOK_SECRET,
    )
    .await?;
    assert_status(&failed, StatusCode::OK, "payment failed");
    let clinic = app.get("/api/clinic", Some(&tenant.token)).await?;
    assert_eq!(clinic.data()["subscriptionStatus"], "PAST_DUE");

    let cancelled = deliver(
        &app,
        &json!({
            "id": "evt_011",
            "type": "subscription.cancelled",
            "data": { "clinicId": tenant.clinic_id }
        }),
        WEBHOOK_SECRET,
    )
    .await?;
    assert_eq!(cancelled.data()["status"], "processed");
    let clinic = app.get("/api/clinic", Some(&tenant.token)).await?;
    assert_eq!(clinic.data()["subscriptionStatus"], "CANCELLED");

    let ignored = deliver(
        &app,
        &json!({ "id": "evt_012", "type": "invoice.created", "data": { "clinicId": tenant.clinic_id } }),
        WEBHOOK_SECRET,
    )
    .await?;
    assert_eq!(ignored.data()["status"], "ignored");

    let malformed = deliver(&app, &json!({ "id": "evt_013" }), WEBHOOK_SECRET).await?;
    assert_status(&malformed, StatusCode::BAD_REQUEST, "malformed payload");
    Ok(())
}

#[tokio::test]
async fn replayed_cancellation_after_upgrade_is_a_duplicate() -> anyhow::Result<()> {
    let app = TestApp::new();
    let tenant = app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;
    let cancel = json!({
        "id": "evt_020",
        "type": "subscription.cancelled",
        "data": { "clinicId": tenant.clinic_id }
    });

    let first = deliver(&app, &cancel, WEBHOOK_SECRET).await?;
    assert_eq!(first.data()["status"], "processed");

    let upgrade = deliver(
        &app,
        &json!({
            "id": "evt_021",
            "type": "payment.succeeded",
            "data": { "clinicId": tenant.clinic_id, "amount": "49.00", "plan": "PRO" }
        }),
        WEBHOOK_SECRET,
    )
    .await?;
    assert_eq!(upgrade.data()["status"], "processed");

    let replay = deliver(&app, &cancel, WEBHOOK_SECRET).await?;
    assert_status(&replay, StatusCode::OK, "replayed cancellation");
    assert_eq!(replay.data()["status"], "duplicate");

    let clinic = app.get("/api/clinic", Some(&tenant.token)).await?;
    assert_eq!(clinic.data()["plan"], "PRO");
    assert_eq!(clinic.data()["subscriptionStatus"], "ACTIVE");
    Ok(())
}
