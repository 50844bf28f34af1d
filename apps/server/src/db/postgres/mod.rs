//! PostgreSQL storage backend

mod rows;
mod transaction;

pub use transaction::PostgresTransaction;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rust_decimal::Decimal;
use sqlx::{postgres::PgListener, PgPool, Row};
use uuid::Uuid;

use super::traits::{PoolStats, QueueChange, QueueChangeStream, Store, StoreTransaction};
use crate::{
    models::{
        Appointment, AppointmentFilter, Clinic, ClinicCount, Doctor, EntryFilter, Patient,
        Payment, QueueEntry, User,
    },
    Error, Result,
};

const ACTIVE_STATUSES: &str = "('WAITING', 'NOTIFIED', 'IN_CONSULTATION')";
const BLOCKING_STATUSES: &str = "('SCHEDULED', 'CONFIRMED')";

/// LISTEN/NOTIFY channel carrying [`QueueChange`] payloads.
pub const QUEUE_CHANNEL: &str = "clinicq_queue_changes";
/// Entry ids per notification.
const NOTIFY_CHUNK: usize = 100;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.map_err(Error::Database)?;
        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        })
    }

    async fn queue_changes(&self) -> Result<QueueChangeStream> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(Error::Database)?;
        listener
            .listen(QUEUE_CHANNEL)
            .await
            .map_err(Error::Database)?;

        let stream = listener.into_stream().map(|notification| {
            let notification = notification.map_err(Error::Database)?;
            serde_json::from_str::<QueueChange>(notification.payload())
                .map_err(|e| Error::Internal(format!("decode queue change: {e}")))
        });
        Ok(stream.boxed())
    }

    async fn get_clinic(&self, id: Uuid) -> Result<Option<Clinic>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM clinics WHERE id = $1",
            rows::CLINIC_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::clinic).transpose()
    }

    async fn get_clinic_by_slug(&self, slug: &str) -> Result<Option<Clinic>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM clinics WHERE slug = $1",
            rows::CLINIC_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::clinic).transpose()
    }

    async fn list_clinics(&self) -> Result<Vec<Clinic>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM clinics ORDER BY created_at DESC, name",
            rows::CLINIC_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::clinic)
    }

    async fn clinics_with_active_entries(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT clinic_id FROM queue_entries WHERE status IN {ACTIVE_STATUSES} ORDER BY clinic_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter()
            .map(|r| r.try_get("clinic_id").map_err(Error::Database))
            .collect()
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE id = $1",
            rows::USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::user).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE lower(email) = lower($1)",
            rows::USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::user).transpose()
    }

    async fn list_clinic_users(&self, clinic_id: Uuid) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users WHERE clinic_id = $1 ORDER BY created_at",
            rows::USER_COLUMNS
        ))
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::user)
    }

    async fn list_doctors(&self, clinic_id: Uuid, include_inactive: bool) -> Result<Vec<Doctor>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM doctors WHERE clinic_id = $1 AND ($2 OR active) ORDER BY name",
            rows::DOCTOR_COLUMNS
        ))
        .bind(clinic_id)
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::doctor)
    }

    async fn get_doctor(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Doctor>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM doctors WHERE clinic_id = $1 AND id = $2",
            rows::DOCTOR_COLUMNS
        ))
        .bind(clinic_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::doctor).transpose()
    }

    async fn insert_doctor(&self, doctor: &Doctor) -> Result<()> {
        sqlx::query(
            "INSERT INTO doctors (id, clinic_id, name, specialty, is_available, active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(doctor.id)
        .bind(doctor.clinic_id)
        .bind(&doctor.name)
        .bind(&doctor.specialty)
        .bind(doctor.is_available)
        .bind(doctor.active)
        .bind(doctor.created_at)
        .bind(doctor.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn update_doctor(&self, doctor: &Doctor) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE doctors
             SET name = $3, specialty = $4, is_available = $5, active = $6, updated_at = $7
             WHERE clinic_id = $1 AND id = $2",
        )
        .bind(doctor.clinic_id)
        .bind(doctor.id)
        .bind(&doctor.name)
        .bind(&doctor.specialty)
        .bind(doctor.is_available)
        .bind(doctor.active)
        .bind(doctor.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        if affected == 0 {
            return Err(Error::not_found("doctor", doctor.id));
        }
        Ok(())
    }

    async fn list_patients(
        &self,
        clinic_id: Uuid,
        search: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Patient>> {
        let pattern = search.map(|s| format!("{}%", s.trim().to_lowercase()));
        let rows = sqlx::query(&format!(
            "SELECT {} FROM patients
             WHERE clinic_id = $1 AND ($2::TEXT IS NULL OR lower(name) LIKE $2 OR phone LIKE $2)
             ORDER BY created_at DESC
             LIMIT $3",
            rows::PATIENT_COLUMNS
        ))
        .bind(clinic_id)
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::patient)
    }

    async fn get_patient(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Patient>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM patients WHERE clinic_id = $1 AND id = $2",
            rows::PATIENT_COLUMNS
        ))
        .bind(clinic_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::patient).transpose()
    }

    async fn insert_patient(&self, patient: &Patient) -> Result<()> {
        sqlx::query(
            "INSERT INTO patients (id, clinic_id, name, phone, email, date_of_birth, notes, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(patient.id)
        .bind(patient.clinic_id)
        .bind(&patient.name)
        .bind(&patient.phone)
        .bind(&patient.email)
        .bind(patient.date_of_birth)
        .bind(&patient.notes)
        .bind(patient.created_at)
        .bind(patient.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            rows::conflict_or_db(e, || {
                format!("a patient with phone {} already exists", patient.phone)
            })
        })?;
        Ok(())
    }

    async fn update_patient(&self, patient: &Patient) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE patients
             SET name = $3, phone = $4, email = $5, date_of_birth = $6, notes = $7, updated_at = $8
             WHERE clinic_id = $1 AND id = $2",
        )
        .bind(patient.clinic_id)
        .bind(patient.id)
        .bind(&patient.name)
        .bind(&patient.phone)
        .bind(&patient.email)
        .bind(patient.date_of_birth)
        .bind(&patient.notes)
        .bind(patient.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            rows::conflict_or_db(e, || {
                format!("a patient with phone {} already exists", patient.phone)
            })
        })?
        .rows_affected();
        if affected == 0 {
            return Err(Error::not_found("patient", patient.id));
        }
        Ok(())
    }

    async fn get_entry(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<QueueEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM queue_entries WHERE clinic_id = $1 AND id = $2",
            rows::ENTRY_COLUMNS
        ))
        .bind(clinic_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::entry).transpose()
    }

    async fn find_entry(&self, id: Uuid) -> Result<Option<QueueEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM queue_entries WHERE id = $1",
            rows::ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::entry).transpose()
    }

    async fn list_entries(
        &self,
        clinic_id: Uuid,
        filter: &EntryFilter,
        day: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM queue_entries
             WHERE clinic_id = $1
               AND ($2::TEXT IS NULL OR status = $2)
               AND ($3::TIMESTAMPTZ IS NULL OR checked_in_at >= $3)
               AND ($4::TIMESTAMPTZ IS NULL OR checked_in_at < $4)
             ORDER BY (status IN {ACTIVE_STATUSES}) DESC, position, checked_in_at",
            rows::ENTRY_COLUMNS
        ))
        .bind(clinic_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(day.map(|(start, _)| start))
        .bind(day.map(|(_, end)| end))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::entry)
    }

    async fn active_entries(&self, clinic_id: Uuid) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM queue_entries
             WHERE clinic_id = $1 AND status IN {ACTIVE_STATUSES}
             ORDER BY position, checked_in_at",
            rows::ENTRY_COLUMNS
        ))
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::entry)
    }

    async fn entries_for_stats(
        &self,
        clinic_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM queue_entries
             WHERE clinic_id = $1
               AND (status IN {ACTIVE_STATUSES} OR (checked_in_at >= $2 AND checked_in_at < $3))",
            rows::ENTRY_COLUMNS
        ))
        .bind(clinic_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::entry)
    }

    async fn get_appointment(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Appointment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM appointments WHERE clinic_id = $1 AND id = $2",
            rows::APPOINTMENT_COLUMNS
        ))
        .bind(clinic_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::appointment).transpose()
    }

    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM appointments
             WHERE clinic_id = $1
               AND ($2::UUID IS NULL OR doctor_id = $2)
               AND ($3::UUID IS NULL OR patient_id = $3)
               AND ($4::TIMESTAMPTZ IS NULL OR ends_at > $4)
               AND ($5::TIMESTAMPTZ IS NULL OR starts_at < $5)
               AND ($6::TEXT IS NULL OR status = $6)
             ORDER BY starts_at",
            rows::APPOINTMENT_COLUMNS
        ))
        .bind(clinic_id)
        .bind(filter.doctor_id)
        .bind(filter.patient_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::appointment)
    }

    async fn doctor_busy(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM appointments
             WHERE doctor_id = $1 AND status IN {BLOCKING_STATUSES}
               AND starts_at < $3 AND ends_at > $2
             ORDER BY starts_at",
            rows::APPOINTMENT_COLUMNS
        ))
        .bind(doctor_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::appointment)
    }

    async fn overdue_appointments(&self, cutoff: DateTime<Utc>) -> Result<Vec<Appointment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM appointments
             WHERE status IN {BLOCKING_STATUSES} AND ends_at < $1
             ORDER BY ends_at",
            rows::APPOINTMENT_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::appointment)
    }

    async fn list_payments(&self, clinic_id: Option<Uuid>, limit: i64) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payments
             WHERE ($1::UUID IS NULL OR clinic_id = $1)
             ORDER BY created_at DESC
             LIMIT $2",
            rows::PAYMENT_COLUMNS
        ))
        .bind(clinic_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::payment)
    }

    async fn clinic_counts(&self) -> Result<Vec<ClinicCount>> {
        let rows = sqlx::query(
            "SELECT plan, subscription_status, COUNT(*) AS count
             FROM clinics
             GROUP BY plan, subscription_status
             ORDER BY plan, subscription_status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::clinic_count)
    }

    async fn net_revenue_since(&self, since: DateTime<Utc>) -> Result<Decimal> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(CASE status
                        WHEN 'SUCCEEDED' THEN amount
                        WHEN 'REFUNDED' THEN -amount
                        ELSE 0 END), 0) AS net
             FROM payments
             WHERE created_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.try_get("net").map_err(Error::Database)
    }

    async fn count_check_ins_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM queue_entries WHERE checked_in_at >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.try_get("count").map_err(Error::Database)
    }

    async fn count_active_entries(&self) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS count FROM queue_entries WHERE status IN {ACTIVE_STATUSES}"
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.try_get("count").map_err(Error::Database)
    }
}
