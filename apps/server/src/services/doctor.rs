//! Doctor roster and presence

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DynStore,
    models::Doctor,
    realtime::{EventKind, RealtimeHub, Room},
    Error, Result,
};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDoctorRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(max = 120))]
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDoctorRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(max = 120))]
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRequest {
    pub available: bool,
}

#[derive(Clone)]
pub struct DoctorService {
    store: DynStore,
    hub: RealtimeHub,
}

impl DoctorService {
    pub fn new(store: DynStore, hub: RealtimeHub) -> Self {
        Self { store, hub }
    }

    pub async fn list(&self, clinic_id: Uuid, include_inactive: bool) -> Result<Vec<Doctor>> {
        self.store.list_doctors(clinic_id, include_inactive).await
    }

    pub async fn get(&self, clinic_id: Uuid, doctor_id: Uuid) -> Result<Doctor> {
        self.store
            .get_doctor(clinic_id, doctor_id)
            .await?
            .ok_or_else(|| Error::not_found("doctor", doctor_id))
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn create(&self, clinic_id: Uuid, request: CreateDoctorRequest) -> Result<Doctor> {
        let now = Utc::now();
        let doctor = Doctor {
            id: Uuid::new_v4(),
            clinic_id,
            name: request.name.trim().to_string(),
            specialty: non_empty(request.specialty),
            is_available: true,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_doctor(&doctor).await?;
        tracing::info!(doctor_id = %doctor.id, "Doctor added");
        Ok(doctor)
    }

    pub async fn update(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        request: UpdateDoctorRequest,
    ) -> Result<Doctor> {
        let mut doctor = self.get_active(clinic_id, doctor_id).await?;
        if let Some(name) = request.name {
            doctor.name = name.trim().to_string();
        }
        if request.specialty.is_some() {
            doctor.specialty = non_empty(request.specialty);
        }
        doctor.updated_at = Utc::now();
        self.store.update_doctor(&doctor).await?;
        Ok(doctor)
    }

    /// Soft delete: the doctor disappears from the roster but keeps their history.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, clinic_id: Uuid, doctor_id: Uuid) -> Result<Doctor> {
        let mut doctor = self.get_active(clinic_id, doctor_id).await?;
        doctor.active = false;
        doctor.is_available = false;
        doctor.updated_at = Utc::now();
        self.store.update_doctor(&doctor).await?;
        tracing::info!("Doctor deactivated");
        Ok(doctor)
    }

    pub async fn set_presence(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        available: bool,
    ) -> Result<Doctor> {
        let mut doctor = self.get_active(clinic_id, doctor_id).await?;
        if doctor.is_available != available {
            doctor.is_available = available;
            doctor.updated_at = Utc::now();
            self.store.update_doctor(&doctor).await?;
        }

        self.hub.publish(
            Room::Clinic(clinic_id),
            EventKind::DoctorPresence,
            json!({ "doctorId": doctor.id, "isAvailable": doctor.is_available }),
        );
        Ok(doctor)
    }

    async fn get_active(&self, clinic_id: Uuid, doctor_id: Uuid) -> Result<Doctor> {
        match self.store.get_doctor(clinic_id, doctor_id).await? {
            Some(doctor) if doctor.active => Ok(doctor),
            _ => Err(Error::not_found("doctor", doctor_id)),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use std::sync::Arc;

    fn service() -> (DoctorService, RealtimeHub) {
        let hub = RealtimeHub::default();
        (
            DoctorService::new(Arc::new(MemoryStore::new()), hub.clone()),
            hub,
        )
    }

    #[tokio::test]
    async fn test_soft_delete_hides_doctor() {
        let (doctors, _) = service();
        let clinic = Uuid::new_v4();
        let doctor = doctors
            .create(
                clinic,
                CreateDoctorRequest {
                    name: " Dr. Grey ".to_string(),
                    specialty: Some("  ".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(doctor.name, "Dr. Grey");
        assert_eq!(doctor.specialty, None);

        doctors.delete(clinic, doctor.id).await.unwrap();
        assert!(doctors.list(clinic, false).await.unwrap().is_empty());
        assert_eq!(doctors.list(clinic, true).await.unwrap().len(), 1);
        assert!(matches!(
            doctors.set_presence(clinic, doctor.id, true).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_presence_is_broadcast() {
        let (doctors, hub) = service();
        let clinic = Uuid::new_v4();
        let doctor = doctors
            .create(
                clinic,
                CreateDoctorRequest {
                    name: "Dr. Grey".to_string(),
                    specialty: None,
                },
            )
            .await
            .unwrap();

        let mut board = hub.subscribe(Room::Clinic(clinic));
        let updated = doctors.set_presence(clinic, doctor.id, false).await.unwrap();
        assert!(!updated.is_available);

        let event = board.recv().await.unwrap();
        assert_eq!(event.event, EventKind::DoctorPresence);
        assert_eq!(event.data["isAvailable"], false);
    }
}
