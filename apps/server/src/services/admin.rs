//! Platform admin dashboard

use chrono::{Duration, Utc};
use clinicq_core::day_window;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::clinic::{AdminClinicUpdate, ClinicService};
use crate::{
    db::DynStore,
    models::{Clinic, Payment},
    Result,
};

const REVENUE_WINDOW_DAYS: i64 = 30;
const DEFAULT_PAYMENT_LIMIT: i64 = 100;
const MAX_PAYMENT_LIMIT: i64 = 500;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformMetrics {
    pub total_clinics: i64,
    pub clinics_by_plan: BTreeMap<String, i64>,
    pub clinics_by_subscription_status: BTreeMap<String, i64>,
    /// Succeeded minus refunded payments over the last 30 days.
    pub revenue_last_30_days: Decimal,
    /// Check-ins since midnight UTC, across all clinics.
    pub check_ins_today: i64,
    pub active_queue_entries: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentQuery {
    pub clinic_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Clone)]
pub struct AdminService {
    store: DynStore,
    clinics: ClinicService,
}

impl AdminService {
    pub fn new(store: DynStore, clinics: ClinicService) -> Self {
        Self { store, clinics }
    }

    pub async fn metrics(&self) -> Result<PlatformMetrics> {
        let now = Utc::now();
        let counts = self.store.clinic_counts().await?;

        let mut by_plan = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        let mut total = 0;
        for count in &counts {
            *by_plan.entry(count.plan.to_string()).or_insert(0) += count.count;
            *by_status
                .entry(count.subscription_status.to_string())
                .or_insert(0) += count.count;
            total += count.count;
        }

        Ok(PlatformMetrics {
            total_clinics: total,
            clinics_by_plan: by_plan,
            clinics_by_subscription_status: by_status,
            revenue_last_30_days: self
                .store
                .net_revenue_since(now - Duration::days(REVENUE_WINDOW_DAYS))
                .await?,
            check_ins_today: self
                .store
                .count_check_ins_since(day_window(now, 0).start)
                .await?,
            active_queue_entries: self.store.count_active_entries().await?,
        })
    }

    pub async fn list_clinics(&self) -> Result<Vec<Clinic>> {
        self.store.list_clinics().await
    }

    pub async fn update_clinic(&self, clinic_id: Uuid, update: AdminClinicUpdate) -> Result<Clinic> {
        let clinic = self.clinics.admin_update(clinic_id, update).await?;
        tracing::info!(
            clinic_id = %clinic.id,
            plan = %clinic.plan,
            subscription_status = %clinic.subscription_status,
            is_active = clinic.is_active,
            "Clinic updated by platform admin"
        );
        Ok(clinic)
    }

    pub async fn list_payments(&self, query: &PaymentQuery) -> Result<Vec<Payment>> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAYMENT_LIMIT)
            .clamp(1, MAX_PAYMENT_LIMIT);
        self.store.list_payments(query.clinic_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, Store};
    use crate::models::PaymentStatus;
    use clinicq_core::{Plan, SubscriptionStatus};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_metrics_aggregate_clinics_and_revenue() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let free = Clinic::new("Free", "free-clinic", now);
        let mut pro = Clinic::new("Pro", "pro-clinic", now);
        pro.plan = Plan::Pro;
        pro.subscription_status = SubscriptionStatus::Active;

        let payment = |event: &str, status, cents| Payment {
            id: Uuid::new_v4(),
            clinic_id: pro.id,
            provider_event_id: event.to_string(),
            status,
            amount: Decimal::new(cents, 2),
            currency: "USD".to_string(),
            plan: Some(Plan::Pro),
            created_at: now,
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_clinic(&free).await.unwrap();
        tx.insert_clinic(&pro).await.unwrap();
        tx.insert_payment(&payment("evt_1", PaymentStatus::Succeeded, 4900))
            .await
            .unwrap();
        tx.insert_payment(&payment("evt_2", PaymentStatus::Refunded, 900))
            .await
            .unwrap();
        tx.insert_payment(&payment("evt_3", PaymentStatus::Failed, 4900))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let admin = AdminService::new(store.clone(), ClinicService::new(store, "http://localhost"));
        let metrics = admin.metrics().await.unwrap();
        assert_eq!(metrics.total_clinics, 2);
        assert_eq!(metrics.clinics_by_plan["FREE"], 1);
        assert_eq!(metrics.clinics_by_plan["PRO"], 1);
        assert_eq!(metrics.clinics_by_subscription_status["ACTIVE"], 1);
        assert_eq!(metrics.revenue_last_30_days, Decimal::new(4000, 2));
        assert_eq!(metrics.active_queue_entries, 0);

        let payments = admin
            .list_payments(&PaymentQuery {
                clinic_id: Some(pro.id),
                limit: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(payments.len(), 2);
    }

    #[tokio::test]
    async fn test_update_clinic_deactivates() {
        let store = Arc::new(MemoryStore::new());
        let clinic = Clinic::new("Sunny", "sunny", Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_clinic(&clinic).await.unwrap();
        tx.commit().await.unwrap();

        let admin = AdminService::new(store.clone(), ClinicService::new(store, "http://localhost"));
        let updated = admin
            .update_clinic(
                clinic.id,
                AdminClinicUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(admin.list_clinics().await.unwrap().len(), 1);
    }
}
