//! Row decoding for the Postgres backend
//!
//! Enumerations are stored as TEXT and parsed back through `FromStr`.

use sqlx::{postgres::PgRow, Row};
use std::str::FromStr;

use crate::{
    models::{Appointment, Clinic, ClinicCount, Doctor, Patient, Payment, QueueEntry, User},
    Error, Result,
};

pub(crate) const CLINIC_COLUMNS: &str = "id, name, slug, kind, plan, subscription_status, phone, \
     address, utc_offset_minutes, opening_time, closing_time, slot_minutes, \
     avg_consultation_minutes, is_active, created_at, updated_at";

pub(crate) const USER_COLUMNS: &str =
    "id, clinic_id, email, name, password_hash, role, created_at";

pub(crate) const DOCTOR_COLUMNS: &str =
    "id, clinic_id, name, specialty, is_available, active, created_at, updated_at";

pub(crate) const PATIENT_COLUMNS: &str =
    "id, clinic_id, name, phone, email, date_of_birth, notes, created_at, updated_at";

pub(crate) const ENTRY_COLUMNS: &str = "id, clinic_id, patient_id, doctor_id, patient_name, \
     phone, reason, position, status, checked_in_at, notified_at, called_at, completed_at, \
     cancelled_at, created_at, updated_at";

pub(crate) const APPOINTMENT_COLUMNS: &str =
    "id, clinic_id, doctor_id, patient_id, starts_at, ends_at, status, notes, created_at, updated_at";

pub(crate) const PAYMENT_COLUMNS: &str =
    "id, clinic_id, provider_event_id, status, amount, currency, plan, created_at";

fn parse<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| Error::Internal(format!("Invalid {column} '{raw}' in database: {e}")))
}

pub(crate) fn clinic(row: &PgRow) -> Result<Clinic> {
    Ok(Clinic {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        kind: parse(row, "kind")?,
        plan: parse(row, "plan")?,
        subscription_status: parse(row, "subscription_status")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        utc_offset_minutes: row.try_get("utc_offset_minutes")?,
        opening_time: row.try_get("opening_time")?,
        closing_time: row.try_get("closing_time")?,
        slot_minutes: row.try_get("slot_minutes")?,
        avg_consultation_minutes: row.try_get("avg_consultation_minutes")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn user(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        clinic_id: row.try_get("clinic_id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        password_hash: row.try_get("password_hash")?,
        role: parse(row, "role")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn doctor(row: &PgRow) -> Result<Doctor> {
    Ok(Doctor {
        id: row.try_get("id")?,
        clinic_id: row.try_get("clinic_id")?,
        name: row.try_get("name")?,
        specialty: row.try_get("specialty")?,
        is_available: row.try_get("is_available")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn patient(row: &PgRow) -> Result<Patient> {
    Ok(Patient {
        id: row.try_get("id")?,
        clinic_id: row.try_get("clinic_id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        date_of_birth: row.try_get("date_of_birth")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn entry(row: &PgRow) -> Result<QueueEntry> {
    Ok(QueueEntry {
        id: row.try_get("id")?,
        clinic_id: row.try_get("clinic_id")?,
        patient_id: row.try_get("patient_id")?,
        doctor_id: row.try_get("doctor_id")?,
        patient_name: row.try_get("patient_name")?,
        phone: row.try_get("phone")?,
        reason: row.try_get("reason")?,
        position: row.try_get("position")?,
        status: parse(row, "status")?,
        checked_in_at: row.try_get("checked_in_at")?,
        notified_at: row.try_get("notified_at")?,
        called_at: row.try_get("called_at")?,
        completed_at: row.try_get("completed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn appointment(row: &PgRow) -> Result<Appointment> {
    Ok(Appointment {
        id: row.try_get("id")?,
        clinic_id: row.try_get("clinic_id")?,
        doctor_id: row.try_get("doctor_id")?,
        patient_id: row.try_get("patient_id")?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        status: parse(row, "status")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn payment(row: &PgRow) -> Result<Payment> {
    let plan: Option<String> = row.try_get("plan")?;
    Ok(Payment {
        id: row.try_get("id")?,
        clinic_id: row.try_get("clinic_id")?,
        provider_event_id: row.try_get("provider_event_id")?,
        status: parse(row, "status")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        plan: plan.map(|p| p.parse::<clinicq_core::Plan>()).transpose()?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn clinic_count(row: &PgRow) -> Result<ClinicCount> {
    Ok(ClinicCount {
        plan: parse(row, "plan")?,
        subscription_status: parse(row, "subscription_status")?,
        count: row.try_get("count")?,
    })
}

pub(crate) fn collect<T>(rows: &[PgRow], decode: fn(&PgRow) -> Result<T>) -> Result<Vec<T>> {
    rows.iter().map(decode).collect()
}

/// Map a unique-constraint violation to `Conflict`, everything else to `Database`.
pub(crate) fn conflict_or_db(err: sqlx::Error, message: impl FnOnce() -> String) -> Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Error::Conflict(message())
        }
        _ => Error::Database(err),
    }
}
