//! Clinic settings, public lookup and the check-in link

use chrono::{NaiveTime, Utc};
use clinicq_core::{ClinicKind, Plan, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;
use validator::Validate;

use crate::{db::DynStore, models::Clinic, Error, Result};

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClinicRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    pub kind: Option<ClinicKind>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(max = 300))]
    pub address: Option<String>,
    pub opening_time: Option<NaiveTime>,
    pub closing_time: Option<NaiveTime>,
    #[validate(range(min = 5, max = 240))]
    pub slot_minutes: Option<i32>,
    #[validate(range(min = 1, max = 240))]
    pub avg_consultation_minutes: Option<i32>,
    #[validate(range(min = -840, max = 840))]
    pub utc_offset_minutes: Option<i32>,
}

/// What the public check-in page may see about a clinic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicClinic {
    pub name: String,
    pub slug: String,
    pub kind: ClinicKind,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub utc_offset_minutes: i32,
    pub accepting_check_ins: bool,
    pub queue_length: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInLink {
    pub slug: String,
    /// URL encoded in the clinic's printed QR code.
    pub url: String,
}

/// Platform-admin changes to a tenant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminClinicUpdate {
    pub plan: Option<Plan>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub is_active: Option<bool>,
}

#[derive(Clone)]
pub struct ClinicService {
    store: DynStore,
    public_base_url: String,
}

impl ClinicService {
    pub fn new(store: DynStore, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into(),
        }
    }

    pub async fn get(&self, clinic_id: Uuid) -> Result<Clinic> {
        self.store
            .get_clinic(clinic_id)
            .await?
            .ok_or_else(|| Error::not_found("clinic", clinic_id))
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn update_settings(
        &self,
        clinic_id: Uuid,
        request: UpdateClinicRequest,
    ) -> Result<Clinic> {
        self.modify(clinic_id, |clinic| {
            if let Some(name) = request.name {
                clinic.name = name.trim().to_string();
            }
            if let Some(kind) = request.kind {
                clinic.kind = kind;
            }
            if request.phone.is_some() {
                clinic.phone = request.phone.filter(|p| !p.trim().is_empty());
            }
            if request.address.is_some() {
                clinic.address = request.address.filter(|a| !a.trim().is_empty());
            }
            if let Some(opening) = request.opening_time {
                clinic.opening_time = opening;
            }
            if let Some(closing) = request.closing_time {
                clinic.closing_time = closing;
            }
            if let Some(slot) = request.slot_minutes {
                clinic.slot_minutes = slot;
            }
            if let Some(avg) = request.avg_consultation_minutes {
                clinic.avg_consultation_minutes = avg;
            }
            if let Some(offset) = request.utc_offset_minutes {
                clinic.utc_offset_minutes = offset;
            }
            clinic.opening_hours().validate()?;
            Ok(())
        })
        .await
    }

    /// Apply a platform-admin update (plan, subscription, activation).
    #[tracing::instrument(skip(self, request))]
    pub async fn admin_update(&self, clinic_id: Uuid, request: AdminClinicUpdate) -> Result<Clinic> {
        self.modify(clinic_id, |clinic| {
            if let Some(plan) = request.plan {
                clinic.plan = plan;
            }
            if let Some(status) = request.subscription_status {
                clinic.subscription_status = status;
            }
            if let Some(active) = request.is_active {
                clinic.is_active = active;
            }
            Ok(())
        })
        .await
    }

    pub async fn public_by_slug(&self, slug: &str) -> Result<PublicClinic> {
        let clinic = self.by_slug(slug).await?;
        let queue_length = self.store.active_entries(clinic.id).await?.len();
        Ok(PublicClinic {
            name: clinic.name,
            slug: clinic.slug,
            kind: clinic.kind,
            phone: clinic.phone,
            address: clinic.address,
            opening_time: clinic.opening_time,
            closing_time: clinic.closing_time,
            utc_offset_minutes: clinic.utc_offset_minutes,
            accepting_check_ins: clinic.is_active,
            queue_length,
        })
    }

    pub async fn by_slug(&self, slug: &str) -> Result<Clinic> {
        let slug = slug.trim().to_ascii_lowercase();
        self.store
            .get_clinic_by_slug(&slug)
            .await?
            .ok_or_else(|| Error::NotFound(format!("clinic '{slug}'")))
    }

    pub async fn check_in_link(&self, clinic_id: Uuid) -> Result<CheckInLink> {
        let clinic = self.get(clinic_id).await?;
        let url = check_in_url(&self.public_base_url, &clinic.slug)?;
        Ok(CheckInLink {
            slug: clinic.slug,
            url,
        })
    }

    async fn modify<F>(&self, clinic_id: Uuid, apply: F) -> Result<Clinic>
    where
        F: FnOnce(&mut Clinic) -> Result<()>,
    {
        let mut tx = self.store.begin().await?;
        let mut clinic = tx
            .lock_clinic(clinic_id)
            .await?
            .ok_or_else(|| Error::not_found("clinic", clinic_id))?;
        apply(&mut clinic)?;
        clinic.updated_at = Utc::now();
        tx.update_clinic(&clinic).await?;
        tx.commit().await?;
        Ok(clinic)
    }
}

/// `{base}/check-in/{slug}`, keeping any path prefix of `base`.
pub fn check_in_url(base: &str, slug: &str) -> Result<String> {
    let mut url = Url::parse(base)
        .map_err(|e| Error::Internal(format!("invalid public_base_url '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| Error::Internal(format!("public_base_url '{base}' cannot hold a path")))?
        .pop_if_empty()
        .push("check-in")
        .push(slug);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, Store};
    use std::sync::Arc;

    async fn seeded() -> (ClinicService, Clinic) {
        let store = Arc::new(MemoryStore::new());
        let clinic = Clinic::new("Sunny Dental", "sunny-dental", Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_clinic(&clinic).await.unwrap();
        tx.commit().await.unwrap();
        (ClinicService::new(store, "https://q.example.com/app/"), clinic)
    }

    #[test]
    fn test_check_in_url() {
        assert_eq!(
            check_in_url("http://localhost:3000", "sunny").unwrap(),
            "http://localhost:3000/check-in/sunny"
        );
        assert_eq!(
            check_in_url("https://q.example.com/app/", "sunny").unwrap(),
            "https://q.example.com/app/check-in/sunny"
        );
        assert!(check_in_url("not a url", "sunny").is_err());
    }

    #[tokio::test]
    async fn test_settings_reject_inverted_hours() {
        let (clinics, clinic) = seeded().await;
        let err = clinics
            .update_settings(
                clinic.id,
                UpdateClinicRequest {
                    opening_time: NaiveTime::from_hms_opt(18, 0, 0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let updated = clinics
            .update_settings(
                clinic.id,
                UpdateClinicRequest {
                    slot_minutes: Some(20),
                    utc_offset_minutes: Some(120),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.slot_minutes, 20);
        assert_eq!(clinics.get(clinic.id).await.unwrap().utc_offset_minutes, 120);
    }

    #[tokio::test]
    async fn test_public_lookup_and_link() {
        let (clinics, clinic) = seeded().await;
        let public = clinics.public_by_slug("Sunny-Dental").await.unwrap();
        assert_eq!(public.name, "Sunny Dental");
        assert!(public.accepting_check_ins);
        assert_eq!(public.queue_length, 0);
        assert!(matches!(
            clinics.public_by_slug("nope").await,
            Err(Error::NotFound(_))
        ));

        let link = clinics.check_in_link(clinic.id).await.unwrap();
        assert_eq!(link.url, "https://q.example.com/app/check-in/sunny-dental");
    }
}
