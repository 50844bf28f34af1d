//! PostgreSQL transaction support for queue and booking mutations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{rows, ACTIVE_STATUSES, BLOCKING_STATUSES, NOTIFY_CHUNK, QUEUE_CHANNEL};
use crate::{
    db::traits::{QueueChange, StoreTransaction},
    models::{Appointment, Clinic, Doctor, Patient, Payment, QueueEntry, User},
    Error, Result,
};

pub struct PostgresTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn tx_mut(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or_else(|| {
            Error::Internal("Transaction already committed or rolled back".to_string())
        })
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_clinic(&mut self, clinic_id: Uuid) -> Result<Option<Clinic>> {
        let tx = self.tx_mut()?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM clinics WHERE id = $1 FOR UPDATE",
            rows::CLINIC_COLUMNS
        ))
        .bind(clinic_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::clinic).transpose()
    }

    async fn active_entries(&mut self, clinic_id: Uuid) -> Result<Vec<QueueEntry>> {
        let tx = self.tx_mut()?;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM queue_entries
             WHERE clinic_id = $1 AND status IN {ACTIVE_STATUSES}
             ORDER BY position, checked_in_at
             FOR UPDATE",
            rows::ENTRY_COLUMNS
        ))
        .bind(clinic_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::entry)
    }

    async fn get_entry(&mut self, clinic_id: Uuid, id: Uuid) -> Result<Option<QueueEntry>> {
        let tx = self.tx_mut()?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM queue_entries WHERE clinic_id = $1 AND id = $2 FOR UPDATE",
            rows::ENTRY_COLUMNS
        ))
        .bind(clinic_id)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::entry).transpose()
    }

    async fn insert_entry(&mut self, entry: &QueueEntry) -> Result<()> {
        let tx = self.tx_mut()?;
        sqlx::query(
            "INSERT INTO queue_entries (id, clinic_id, patient_id, doctor_id, patient_name, phone, reason,
                 position, status, checked_in_at, notified_at, called_at, completed_at, cancelled_at,
                 created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(entry.id)
        .bind(entry.clinic_id)
        .bind(entry.patient_id)
        .bind(entry.doctor_id)
        .bind(&entry.patient_name)
        .bind(&entry.phone)
        .bind(&entry.reason)
        .bind(entry.position)
        .bind(entry.status.as_str())
        .bind(entry.checked_in_at)
        .bind(entry.notified_at)
        .bind(entry.called_at)
        .bind(entry.completed_at)
        .bind(entry.cancelled_at)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| rows::conflict_or_db(e, || format!("queue entry {} exists", entry.id)))?;
        Ok(())
    }

    async fn update_entry(&mut self, entry: &QueueEntry) -> Result<()> {
        let tx = self.tx_mut()?;
        let affected = sqlx::query(
            "UPDATE queue_entries
             SET patient_id = $3, doctor_id = $4, patient_name = $5, phone = $6, reason = $7,
                 position = $8, status = $9, checked_in_at = $10, notified_at = $11,
                 called_at = $12, completed_at = $13, cancelled_at = $14, updated_at = $15
             WHERE clinic_id = $1 AND id = $2",
        )
        .bind(entry.clinic_id)
        .bind(entry.id)
        .bind(entry.patient_id)
        .bind(entry.doctor_id)
        .bind(&entry.patient_name)
        .bind(&entry.phone)
        .bind(&entry.reason)
        .bind(entry.position)
        .bind(entry.status.as_str())
        .bind(entry.checked_in_at)
        .bind(entry.notified_at)
        .bind(entry.called_at)
        .bind(entry.completed_at)
        .bind(entry.cancelled_at)
        .bind(entry.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        if affected == 0 {
            return Err(Error::not_found("queue entry", entry.id));
        }
        Ok(())
    }

    async fn upsert_patient(&mut self, patient: &Patient) -> Result<Patient> {
        let tx = self.tx_mut()?;
        let row = sqlx::query(&format!(
            "INSERT INTO patients (id, clinic_id, name, phone, email, date_of_birth, notes, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (clinic_id, phone)
             DO UPDATE SET name = EXCLUDED.name, updated_at = EXCLUDED.updated_at
             RETURNING {}",
            rows::PATIENT_COLUMNS
        ))
        .bind(patient.id)
        .bind(patient.clinic_id)
        .bind(&patient.name)
        .bind(&patient.phone)
        .bind(&patient.email)
        .bind(patient.date_of_birth)
        .bind(&patient.notes)
        .bind(patient.created_at)
        .bind(patient.updated_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;
        rows::patient(&row)
    }

    async fn get_patient(&mut self, clinic_id: Uuid, id: Uuid) -> Result<Option<Patient>> {
        let tx = self.tx_mut()?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM patients WHERE clinic_id = $1 AND id = $2",
            rows::PATIENT_COLUMNS
        ))
        .bind(clinic_id)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::patient).transpose()
    }

    async fn lock_doctor(&mut self, clinic_id: Uuid, doctor_id: Uuid) -> Result<Option<Doctor>> {
        let tx = self.tx_mut()?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM doctors WHERE clinic_id = $1 AND id = $2 FOR UPDATE",
            rows::DOCTOR_COLUMNS
        ))
        .bind(clinic_id)
        .bind(doctor_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::doctor).transpose()
    }

    async fn doctor_busy(
        &mut self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        let tx = self.tx_mut()?;
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
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;
        rows::collect(&rows, rows::appointment)
    }

    async fn get_appointment(
        &mut self,
        clinic_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Appointment>> {
        let tx = self.tx_mut()?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM appointments WHERE clinic_id = $1 AND id = $2 FOR UPDATE",
            rows::APPOINTMENT_COLUMNS
        ))
        .bind(clinic_id)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(rows::appointment).transpose()
    }

    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<()> {
        let tx = self.tx_mut()?;
        sqlx::query(
            "INSERT INTO appointments (id, clinic_id, doctor_id, patient_id, starts_at, ends_at, status, notes, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(appointment.id)
        .bind(appointment.clinic_id)
        .bind(appointment.doctor_id)
        .bind(appointment.patient_id)
        .bind(appointment.starts_at)
        .bind(appointment.ends_at)
        .bind(appointment.status.as_str())
        .bind(&appointment.notes)
        .bind(appointment.created_at)
        .bind(appointment.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<()> {
        let tx = self.tx_mut()?;
        let affected = sqlx::query(
            "UPDATE appointments
             SET doctor_id = $3, patient_id = $4, starts_at = $5, ends_at = $6, status = $7,
                 notes = $8, updated_at = $9
             WHERE clinic_id = $1 AND id = $2",
        )
        .bind(appointment.clinic_id)
        .bind(appointment.id)
        .bind(appointment.doctor_id)
        .bind(appointment.patient_id)
        .bind(appointment.starts_at)
        .bind(appointment.ends_at)
        .bind(appointment.status.as_str())
        .bind(&appointment.notes)
        .bind(appointment.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        if affected == 0 {
            return Err(Error::not_found("appointment", appointment.id));
        }
        Ok(())
    }

    async fn insert_clinic(&mut self, clinic: &Clinic) -> Result<()> {
        let tx = self.tx_mut()?;
        sqlx::query(
            "INSERT INTO clinics (id, name, slug, kind, plan, subscription_status, phone, address,
                 utc_offset_minutes, opening_time, closing_time, slot_minutes, avg_consultation_minutes,
                 is_active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(clinic.id)
        .bind(&clinic.name)
        .bind(&clinic.slug)
        .bind(clinic.kind.as_str())
        .bind(clinic.plan.as_str())
        .bind(clinic.subscription_status.as_str())
        .bind(&clinic.phone)
        .bind(&clinic.address)
        .bind(clinic.utc_offset_minutes)
        .bind(clinic.opening_time)
        .bind(clinic.closing_time)
        .bind(clinic.slot_minutes)
        .bind(clinic.avg_consultation_minutes)
        .bind(clinic.is_active)
        .bind(clinic.created_at)
        .bind(clinic.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            rows::conflict_or_db(e, || {
                format!("clinic slug '{}' is already taken", clinic.slug)
            })
        })?;
        Ok(())
    }

    async fn update_clinic(&mut self, clinic: &Clinic) -> Result<()> {
        let tx = self.tx_mut()?;
        let affected = sqlx::query(
            "UPDATE clinics
             SET name = $2, kind = $3, plan = $4, subscription_status = $5, phone = $6,
                 address = $7, utc_offset_minutes = $8, opening_time = $9, closing_time = $10,
                 slot_minutes = $11, avg_consultation_minutes = $12, is_active = $13, updated_at = $14
             WHERE id = $1",
        )
        .bind(clinic.id)
        .bind(&clinic.name)
        .bind(clinic.kind.as_str())
        .bind(clinic.plan.as_str())
        .bind(clinic.subscription_status.as_str())
        .bind(&clinic.phone)
        .bind(&clinic.address)
        .bind(clinic.utc_offset_minutes)
        .bind(clinic.opening_time)
        .bind(clinic.closing_time)
        .bind(clinic.slot_minutes)
        .bind(clinic.avg_consultation_minutes)
        .bind(clinic.is_active)
        .bind(clinic.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        if affected == 0 {
            return Err(Error::not_found("clinic", clinic.id));
        }
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> Result<()> {
        let tx = self.tx_mut()?;
        sqlx::query(
            "INSERT INTO users (id, clinic_id, email, name, password_hash, role, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user.id)
        .bind(user.clinic_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            rows::conflict_or_db(e, || format!("email {} is already registered", user.email))
        })?;
        Ok(())
    }

    async fn record_webhook_event(
        &mut self,
        event_id: &str,
        kind: &str,
        clinic_id: Uuid,
        received_at: DateTime<Utc>,
    ) -> Result<bool> {
        let tx = self.tx_mut()?;
        let inserted = sqlx::query(
            "INSERT INTO webhook_events (provider_event_id, kind, clinic_id, received_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (provider_event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(kind)
        .bind(clinic_id)
        .bind(received_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<bool> {
        let tx = self.tx_mut()?;
        let inserted = sqlx::query(
            "INSERT INTO payments (id, clinic_id, provider_event_id, status, amount, currency, plan, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (provider_event_id) DO NOTHING",
        )
        .bind(payment.id)
        .bind(payment.clinic_id)
        .bind(&payment.provider_event_id)
        .bind(payment.status.as_str())
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.plan.map(|p| p.as_str()))
        .bind(payment.created_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn notify_queue_change(&mut self, change: &QueueChange) -> Result<()> {
        // NOTIFY payloads are capped at 8000 bytes; large sweeps go out in chunks.
        let mut chunks: Vec<&[Uuid]> = change.entry_ids.chunks(NOTIFY_CHUNK).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let tx = self.tx_mut()?;
        for chunk in chunks {
            let payload = serde_json::to_string(&QueueChange {
                origin: change.origin,
                clinic_id: change.clinic_id,
                entry_ids: chunk.to_vec(),
            })
            .map_err(|e| Error::Internal(format!("encode queue change: {e}")))?;
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(QUEUE_CHANNEL)
                .bind(payload)
                .execute(&mut **tx)
                .await
                .map_err(Error::Database)?;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::Internal("Transaction already committed".to_string()))?;

        tx.commit().await.map_err(Error::Database)
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::Internal("Transaction already rolled back".to_string()))?;

        tx.rollback().await.map_err(Error::Database)
    }
}
