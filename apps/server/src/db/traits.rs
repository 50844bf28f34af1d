//! Storage traits shared by the Postgres and in-memory backends

use crate::{
    models::{
        Appointment, AppointmentFilter, Clinic, ClinicCount, Doctor, EntryFilter, Patient,
        Payment, QueueEntry, User,
    },
    Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub type DynStore = Arc<dyn Store>;

/// A committed queue mutation, announced to every process sharing the store.
///
/// `entry_ids` lists the entries whose position or status changed, including
/// entries that left the queue. `origin` identifies the announcing process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueChange {
    pub origin: Uuid,
    pub clinic_id: Uuid,
    pub entry_ids: Vec<Uuid>,
}

pub type QueueChangeStream = BoxStream<'static, Result<QueueChange>>;

/// Connection pool occupancy, reported on `/metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

/// Reads and single-row writes.
///
/// Everything that must observe a consistent queue (check-in, reorder,
/// status changes, booking) goes through [`StoreTransaction`] instead.
/// Implementations may serialize transactions, so a caller holding a
/// transaction must not call back into the `Store`.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Begin a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    async fn ping(&self) -> Result<()>;

    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }

    /// Queue changes committed by any process, as they are committed.
    ///
    /// The stream ends when the underlying connection is lost.
    async fn queue_changes(&self) -> Result<QueueChangeStream>;

    // Clinics

    async fn get_clinic(&self, id: Uuid) -> Result<Option<Clinic>>;

    async fn get_clinic_by_slug(&self, slug: &str) -> Result<Option<Clinic>>;

    async fn list_clinics(&self) -> Result<Vec<Clinic>>;

    /// Clinics that currently hold at least one active queue entry.
    async fn clinics_with_active_entries(&self) -> Result<Vec<Uuid>>;

    // Users

    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn list_clinic_users(&self, clinic_id: Uuid) -> Result<Vec<User>>;

    // Doctors

    async fn list_doctors(&self, clinic_id: Uuid, include_inactive: bool) -> Result<Vec<Doctor>>;

    async fn get_doctor(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Doctor>>;

    async fn insert_doctor(&self, doctor: &Doctor) -> Result<()>;

    async fn update_doctor(&self, doctor: &Doctor) -> Result<()>;

    // Patients

    /// Patients whose name or phone starts with `search` (case-insensitive), newest first.
    async fn list_patients(
        &self,
        clinic_id: Uuid,
        search: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Patient>>;

    async fn get_patient(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Patient>>;

    /// # Errors
    /// * `Conflict` - the clinic already has a patient with this phone
    async fn insert_patient(&self, patient: &Patient) -> Result<()>;

    /// # Errors
    /// * `Conflict` - the new phone belongs to another patient of the clinic
    async fn update_patient(&self, patient: &Patient) -> Result<()>;

    // Queue

    async fn get_entry(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<QueueEntry>>;

    /// Lookup without a clinic scope, for the public patient view.
    async fn find_entry(&self, id: Uuid) -> Result<Option<QueueEntry>>;

    /// Entries matching `filter`; `day` is the UTC window of `filter.date`
    /// resolved against the clinic's offset.
    async fn list_entries(
        &self,
        clinic_id: Uuid,
        filter: &EntryFilter,
        day: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<QueueEntry>>;

    async fn active_entries(&self, clinic_id: Uuid) -> Result<Vec<QueueEntry>>;

    /// Active entries plus every entry checked in within `[start, end)`.
    async fn entries_for_stats(
        &self,
        clinic_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>>;

    // Appointments

    async fn get_appointment(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Appointment>>;

    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>>;

    /// Slot-blocking appointments of a doctor overlapping `[start, end)`.
    async fn doctor_busy(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;

    /// SCHEDULED / CONFIRMED appointments that ended before `cutoff`.
    async fn overdue_appointments(&self, cutoff: DateTime<Utc>) -> Result<Vec<Appointment>>;

    // Billing and platform aggregates

    async fn list_payments(&self, clinic_id: Option<Uuid>, limit: i64) -> Result<Vec<Payment>>;

    async fn clinic_counts(&self) -> Result<Vec<ClinicCount>>;

    /// Succeeded minus refunded amounts since `since`.
    async fn net_revenue_since(&self, since: DateTime<Utc>) -> Result<Decimal>;

    async fn count_check_ins_since(&self, since: DateTime<Utc>) -> Result<i64>;

    async fn count_active_entries(&self) -> Result<i64>;
}

/// A unit of work that either commits entirely or not at all.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Lock the clinic row for the rest of the transaction.
    ///
    /// Every queue mutation starts here, so concurrent mutations of the same
    /// clinic's queue are serialized.
    async fn lock_clinic(&mut self, clinic_id: Uuid) -> Result<Option<Clinic>>;

    async fn active_entries(&mut self, clinic_id: Uuid) -> Result<Vec<QueueEntry>>;

    async fn get_entry(&mut self, clinic_id: Uuid, id: Uuid) -> Result<Option<QueueEntry>>;

    async fn insert_entry(&mut self, entry: &QueueEntry) -> Result<()>;

    async fn update_entry(&mut self, entry: &QueueEntry) -> Result<()>;

    /// Insert the patient, or refresh the name of the one holding the same
    /// `(clinic_id, phone)`. Returns the stored record.
    async fn upsert_patient(&mut self, patient: &Patient) -> Result<Patient>;

    async fn get_patient(&mut self, clinic_id: Uuid, id: Uuid) -> Result<Option<Patient>>;

    /// Lock the doctor row; serializes bookings for one doctor.
    async fn lock_doctor(&mut self, clinic_id: Uuid, doctor_id: Uuid) -> Result<Option<Doctor>>;

    async fn doctor_busy(
        &mut self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;

    async fn get_appointment(&mut self, clinic_id: Uuid, id: Uuid)
        -> Result<Option<Appointment>>;

    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<()>;

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<()>;

    /// # Errors
    /// * `Conflict` - the slug is taken
    async fn insert_clinic(&mut self, clinic: &Clinic) -> Result<()>;

    async fn update_clinic(&mut self, clinic: &Clinic) -> Result<()>;

    /// # Errors
    /// * `Conflict` - the email is taken
    async fn insert_user(&mut self, user: &User) -> Result<()>;

    /// Claim a provider webhook event id; returns `false` when it was already
    /// processed.
    async fn record_webhook_event(
        &mut self,
        event_id: &str,
        kind: &str,
        clinic_id: Uuid,
        received_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Record a payment; returns `false` when its provider event id was
    /// already recorded.
    async fn insert_payment(&mut self, payment: &Payment) -> Result<bool>;

    /// Announce `change` once this transaction commits.
    async fn notify_queue_change(&mut self, change: &QueueChange) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
