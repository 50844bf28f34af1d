//! Patient records

use chrono::{NaiveDate, Utc};
use clinicq_core::normalize_phone;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{db::DynStore, models::Patient, Error, Result};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 3, max = 32))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(min = 3, max = 32))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientQuery {
    /// Name or phone prefix.
    pub search: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Clone)]
pub struct PatientService {
    store: DynStore,
}

impl PatientService {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    pub async fn create(&self, clinic_id: Uuid, request: CreatePatientRequest) -> Result<Patient> {
        let phone = normalize_phone(&request.phone)?;
        let mut patient = Patient::new(clinic_id, request.name.trim(), phone, Utc::now());
        patient.email = request.email;
        patient.date_of_birth = request.date_of_birth;
        patient.notes = request.notes.filter(|n| !n.trim().is_empty());

        self.store.insert_patient(&patient).await?;
        Ok(patient)
    }

    pub async fn list(&self, clinic_id: Uuid, query: &PatientQuery) -> Result<Vec<Patient>> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        // Phones are stored normalized, so a formatted phone prefix is normalized too.
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let search = search.map(|s| {
            if s.starts_with('+') || s.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                s.chars()
                    .filter(|c| c.is_ascii_digit() || *c == '+')
                    .collect::<String>()
            } else {
                s.to_string()
            }
        });
        self.store
            .list_patients(clinic_id, search.as_deref(), limit)
            .await
    }

    pub async fn get(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<Patient> {
        self.store
            .get_patient(clinic_id, patient_id)
            .await?
            .ok_or_else(|| Error::not_found("patient", patient_id))
    }

    pub async fn update(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
        request: UpdatePatientRequest,
    ) -> Result<Patient> {
        let mut patient = self.get(clinic_id, patient_id).await?;
        if let Some(name) = request.name {
            patient.name = name.trim().to_string();
        }
        if let Some(phone) = request.phone {
            patient.phone = normalize_phone(&phone)?;
        }
        if request.email.is_some() {
            patient.email = request.email;
        }
        if request.date_of_birth.is_some() {
            patient.date_of_birth = request.date_of_birth;
        }
        if let Some(notes) = request.notes {
            patient.notes = Some(notes).filter(|n| !n.trim().is_empty());
        }
        patient.updated_at = Utc::now();

        self.store.update_patient(&patient).await?;
        Ok(patient)
    }
}
