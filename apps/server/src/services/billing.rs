//! Payment provider webhooks
//!
//! The provider signs the raw request body with a shared secret:
//! `x-clinicq-signature: sha256=<hex HMAC-SHA256(secret, body)>`.
//! Events are idempotent on their `id`; a replay is acknowledged and ignored.

use chrono::Utc;
use clinicq_core::{Plan, SubscriptionStatus};
use hmac::{digest::KeyInit, Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    db::DynStore,
    metrics::WEBHOOK_EVENTS_TOTAL,
    models::{Payment, PaymentStatus},
    Error, Result,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-clinicq-signature";
const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    #[serde(alias = "clinicId")]
    pub clinic_id: Uuid,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub plan: Option<Plan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Processed,
    Duplicate,
    Ignored,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub event_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: WebhookStatus,
}

#[derive(Clone)]
pub struct BillingService {
    store: DynStore,
    webhook_secret: String,
}

impl BillingService {
    pub fn new(store: DynStore, webhook_secret: impl Into<String>) -> Self {
        Self {
            store,
            webhook_secret: webhook_secret.into(),
        }
    }

    #[tracing::instrument(skip(self, body, signature), fields(bytes = body.len()))]
    pub async fn handle_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookOutcome> {
        if self.webhook_secret.is_empty() {
            return Err(Error::Unauthorized(
                "Payment webhooks are not configured".to_string(),
            ));
        }
        let signature = signature
            .ok_or_else(|| Error::Unauthorized(format!("Missing {SIGNATURE_HEADER} header")))?;
        if !verify_signature(&self.webhook_secret, body, signature) {
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&["unknown", "bad_signature"])
                .inc();
            return Err(Error::Unauthorized("Invalid webhook signature".to_string()));
        }

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| Error::Validation(format!("Malformed webhook payload: {e}")))?;

        let result = self.apply(&event).await;
        let outcome = match &result {
            Ok(status) => match status {
                WebhookStatus::Processed => "processed",
                WebhookStatus::Duplicate => "duplicate",
                WebhookStatus::Ignored => "ignored",
            },
            Err(_) => "error",
        };
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[event_label(&event.kind), outcome])
            .inc();

        let status = result?;
        tracing::info!(event_id = %event.id, kind = %event.kind, outcome, "Webhook handled");
        Ok(WebhookOutcome {
            event_id: event.id,
            kind: event.kind,
            status,
        })
    }

    async fn apply(&self, event: &WebhookEvent) -> Result<WebhookStatus> {
        let payment_status = match event.kind.as_str() {
            "payment.succeeded" => Some(PaymentStatus::Succeeded),
            "payment.failed" => Some(PaymentStatus::Failed),
            "payment.refunded" => Some(PaymentStatus::Refunded),
            "subscription.cancelled" => None,
            _ => return Ok(WebhookStatus::Ignored),
        };

        let amount = match payment_status {
            Some(_) => {
                let amount = event.data.amount.ok_or_else(|| {
                    Error::Validation(format!("{} requires data.amount", event.kind))
                })?;
                if amount.is_sign_negative() {
                    return Err(Error::Validation("amount must not be negative".to_string()));
                }
                Some(amount.round_dp(2))
            }
            None => None,
        };

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut clinic = tx
            .lock_clinic(event.data.clinic_id)
            .await?
            .ok_or_else(|| Error::not_found("clinic", event.data.clinic_id))?;

        // The event id is claimed before any effect; a replay stops here.
        if !tx
            .record_webhook_event(&event.id, &event.kind, clinic.id, now)
            .await?
        {
            tx.rollback().await?;
            return Ok(WebhookStatus::Duplicate);
        }

        match (payment_status, amount) {
            (Some(status), Some(amount)) => {
                let payment = Payment {
                    id: Uuid::new_v4(),
                    clinic_id: clinic.id,
                    provider_event_id: event.id.clone(),
                    status,
                    amount,
                    currency: event
                        .data
                        .currency
                        .as_deref()
                        .unwrap_or("USD")
                        .to_ascii_uppercase(),
                    plan: event.data.plan,
                    created_at: now,
                };
                if !tx.insert_payment(&payment).await? {
                    tx.rollback().await?;
                    return Ok(WebhookStatus::Duplicate);
                }
                match status {
                    PaymentStatus::Succeeded => {
                        if let Some(plan) = event.data.plan {
                            clinic.plan = plan;
                        }
                        clinic.subscription_status = SubscriptionStatus::Active;
                    }
                    PaymentStatus::Failed => {
                        clinic.subscription_status = SubscriptionStatus::PastDue
                    }
                    PaymentStatus::Refunded => {}
                }
            }
            _ => {
                clinic.plan = Plan::Free;
                clinic.subscription_status = SubscriptionStatus::Cancelled;
            }
        }

        clinic.updated_at = now;
        tx.update_clinic(&clinic).await?;
        tx.commit().await?;
        Ok(WebhookStatus::Processed)
    }
}

fn mac_for(secret: &str) -> Result<HmacSha256> {
    <HmacSha256 as KeyInit>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Internal(format!("webhook key: {e}")))
}

/// `sha256=<hex>` signature for `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = mac_for(secret)?;
    mac.update(body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Constant-time check of a `sha256=<hex>` header value.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = mac_for(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn event_label(kind: &str) -> &'static str {
    match kind {
        "payment.succeeded" => "payment.succeeded",
        "payment.failed" => "payment.failed",
        "payment.refunded" => "payment.refunded",
        "subscription.cancelled" => "subscription.cancelled",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, Store};
    use crate::models::Clinic;
    use serde_json::json;
    use std::sync::Arc;

    const SECRET: &str = "whsec_test";

    async fn seeded() -> (BillingService, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let clinic = Clinic::new("Sunny", "sunny", Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_clinic(&clinic).await.unwrap();
        tx.commit().await.unwrap();
        (BillingService::new(store.clone(), SECRET), store, clinic.id)
    }

    async fn deliver(billing: &BillingService, payload: serde_json::Value) -> Result<WebhookOutcome> {
        let body = payload.to_string();
        let signature = sign(SECRET, body.as_bytes())?;
        billing.handle_webhook(body.as_bytes(), Some(&signature)).await
    }

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign(SECRET, body).unwrap();
        assert!(header.starts_with("sha256="));
        assert!(verify_signature(SECRET, body, &header));
        assert!(!verify_signature("other", body, &header));
        assert!(!verify_signature(SECRET, b"tampered", &header));
        assert!(!verify_signature(SECRET, body, "sha256=zz"));
        assert!(!verify_signature(SECRET, body, header.trim_start_matches("sha256=")));
    }

    #[tokio::test]
    async fn test_rejects_bad_signature_and_missing_secret() {
        let (billing, _, _) = seeded().await;
        let err = billing
            .handle_webhook(b"{}", Some("sha256=00"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let unconfigured = BillingService::new(Arc::new(MemoryStore::new()), "");
        let body = b"{}";
        let err = unconfigured
            .handle_webhook(body, Some(&sign("", body).unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_payment_succeeded_is_idempotent() {
        let (billing, store, clinic_id) = seeded().await;
        let payload = json!({
            "id": "evt_100",
            "type": "payment.succeeded",
            "data": {"clinic_id": clinic_id, "amount": "49.00", "currency": "usd", "plan": "PRO"}
        });

        let first = deliver(&billing, payload.clone()).await.unwrap();
        assert_eq!(first.status, WebhookStatus::Processed);
        let replay = deliver(&billing, payload).await.unwrap();
        assert_eq!(replay.status, WebhookStatus::Duplicate);

        let clinic = store.get_clinic(clinic_id).await.unwrap().unwrap();
        assert_eq!(clinic.plan, Plan::Pro);
        assert_eq!(clinic.subscription_status, SubscriptionStatus::Active);

        let payments = store.list_payments(Some(clinic_id), 10).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].currency, "USD");
        assert_eq!(payments[0].amount, Decimal::new(4900, 2));
    }

    #[tokio::test]
    async fn test_failure_cancellation_and_unknown_events() {
        let (billing, store, clinic_id) = seeded().await;

        deliver(
            &billing,
            json!({"id": "evt_1", "type": "payment.failed", "data": {"clinic_id": clinic_id, "amount": 49}}),
        )
        .await
        .unwrap();
        let clinic = store.get_clinic(clinic_id).await.unwrap().unwrap();
        assert_eq!(clinic.subscription_status, SubscriptionStatus::PastDue);

        deliver(
            &billing,
            json!({"id": "evt_2", "type": "subscription.cancelled", "data": {"clinic_id": clinic_id}}),
        )
        .await
        .unwrap();
        let clinic = store.get_clinic(clinic_id).await.unwrap().unwrap();
        assert_eq!(clinic.plan, Plan::Free);
        assert_eq!(clinic.subscription_status, SubscriptionStatus::Cancelled);

        let ignored = deliver(
            &billing,
            json!({"id": "evt_3", "type": "invoice.created", "data": {"clinic_id": clinic_id}}),
        )
        .await
        .unwrap();
        assert_eq!(ignored.status, WebhookStatus::Ignored);

        let unknown_clinic = deliver(
            &billing,
            json!({"id": "evt_4", "type": "payment.succeeded", "data": {"clinic_id": Uuid::new_v4(), "amount": 1}}),
        )
        .await;
        assert!(matches!(unknown_clinic, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_replayed_cancellation_is_ignored() {
        let (billing, store, clinic_id) = seeded().await;
        let cancel = json!({
            "id": "evt_cancel",
            "type": "subscription.cancelled",
            "data": {"clinic_id": clinic_id}
        });

        let first = deliver(&billing, cancel.clone()).await.unwrap();
        assert_eq!(first.status, WebhookStatus::Processed);

        deliver(
            &billing,
            json!({
                "id": "evt_pay",
                "type": "payment.succeeded",
                "data": {"clinic_id": clinic_id, "amount": "49.00", "plan": "PRO"}
            }),
        )
        .await
        .unwrap();

        let replay = deliver(&billing, cancel).await.unwrap();
        assert_eq!(replay.status, WebhookStatus::Duplicate);

        let clinic = store.get_clinic(clinic_id).await.unwrap().unwrap();
        assert_eq!(clinic.plan, Plan::Pro);
        assert_eq!(clinic.subscription_status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_rejected_event_does_not_claim_its_id() {
        let (billing, store, clinic_id) = seeded().await;
        let missing_amount = json!({
            "id": "evt_retry",
            "type": "payment.succeeded",
            "data": {"clinic_id": clinic_id, "plan": "PRO"}
        });
        assert!(matches!(
            deliver(&billing, missing_amount).await,
            Err(Error::Validation(_))
        ));

        let fixed = deliver(
            &billing,
            json!({
                "id": "evt_retry",
                "type": "payment.succeeded",
                "data": {"clinic_id": clinic_id, "amount": 10, "plan": "PRO"}
            }),
        )
        .await
        .unwrap();
        assert_eq!(fixed.status, WebhookStatus::Processed);
        let clinic = store.get_clinic(clinic_id).await.unwrap().unwrap();
        assert_eq!(clinic.plan, Plan::Pro);
    }
}
