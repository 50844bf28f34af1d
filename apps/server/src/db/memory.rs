//! In-memory storage backend
//!
//! All tables sit behind one async mutex. A transaction takes the lock for its
//! whole lifetime and works on a copy of the tables that replaces the
//! original on commit, so transactions are fully serialized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use futures::StreamExt;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    Mutex, OwnedMutexGuard,
};
use uuid::Uuid;

use super::traits::{QueueChange, QueueChangeStream, Store, StoreTransaction};
use crate::{
    models::{
        Appointment, AppointmentFilter, Clinic, ClinicCount, Doctor, EntryFilter, Patient,
        Payment, PaymentStatus, QueueEntry, User,
    },
    Error, Result,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    clinics: HashMap<Uuid, Clinic>,
    users: HashMap<Uuid, User>,
    doctors: HashMap<Uuid, Doctor>,
    patients: HashMap<Uuid, Patient>,
    entries: HashMap<Uuid, QueueEntry>,
    appointments: HashMap<Uuid, Appointment>,
    payments: Vec<Payment>,
    webhook_events: HashSet<String>,
}

impl Tables {
    fn active_entries(&self, clinic_id: Uuid) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self
            .entries
            .values()
            .filter(|e| e.clinic_id == clinic_id && e.is_active())
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.position, e.checked_in_at));
        entries
    }

    fn entry(&self, clinic_id: Uuid, id: Uuid) -> Option<QueueEntry> {
        self.entries
            .get(&id)
            .filter(|e| e.clinic_id == clinic_id)
            .cloned()
    }

    fn patient(&self, clinic_id: Uuid, id: Uuid) -> Option<Patient> {
        self.patients
            .get(&id)
            .filter(|p| p.clinic_id == clinic_id)
            .cloned()
    }

    fn patient_by_phone(&self, clinic_id: Uuid, phone: &str) -> Option<&Patient> {
        self.patients
            .values()
            .find(|p| p.clinic_id == clinic_id && p.phone == phone)
    }

    fn appointment(&self, clinic_id: Uuid, id: Uuid) -> Option<Appointment> {
        self.appointments
            .get(&id)
            .filter(|a| a.clinic_id == clinic_id)
            .cloned()
    }

    fn doctor_busy(&self, doctor_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Appointment> {
        let mut busy: Vec<Appointment> = self
            .appointments
            .values()
            .filter(|a| {
                a.doctor_id == doctor_id
                    && a.status.blocks_slot()
                    && a.starts_at < end
                    && start < a.ends_at
            })
            .cloned()
            .collect();
        busy.sort_by_key(|a| a.starts_at);
        busy
    }

    fn check_patient_phone(&self, patient: &Patient) -> Result<()> {
        match self.patient_by_phone(patient.clinic_id, &patient.phone) {
            Some(existing) if existing.id != patient.id => Err(Error::Conflict(format!(
                "a patient with phone {} already exists",
                patient.phone
            ))),
            _ => Ok(()),
        }
    }
}

const CHANGE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    changes: broadcast::Sender<QueueChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tables: Arc::default(),
            changes: broadcast::channel(CHANGE_CAPACITY).0,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            changes: self.changes.clone(),
            pending: Vec::new(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn queue_changes(&self) -> Result<QueueChangeStream> {
        let stream = futures::stream::unfold(self.changes.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(change) => return Some((Ok(change), rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Queue change listener lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn get_clinic(&self, id: Uuid) -> Result<Option<Clinic>> {
        Ok(self.tables.lock().await.clinics.get(&id).cloned())
    }

    async fn get_clinic_by_slug(&self, slug: &str) -> Result<Option<Clinic>> {
        let tables = self.tables.lock().await;
        Ok(tables.clinics.values().find(|c| c.slug == slug).cloned())
    }

    async fn list_clinics(&self) -> Result<Vec<Clinic>> {
        let tables = self.tables.lock().await;
        let mut clinics: Vec<Clinic> = tables.clinics.values().cloned().collect();
        clinics.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.name.cmp(&b.name)));
        Ok(clinics)
    }

    async fn clinics_with_active_entries(&self) -> Result<Vec<Uuid>> {
        let tables = self.tables.lock().await;
        let mut ids: Vec<Uuid> = tables
            .entries
            .values()
            .filter(|e| e.is_active())
            .map(|e| e.clinic_id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_clinic_users(&self, clinic_id: Uuid) -> Result<Vec<User>> {
        let tables = self.tables.lock().await;
        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|u| u.clinic_id == Some(clinic_id))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn list_doctors(&self, clinic_id: Uuid, include_inactive: bool) -> Result<Vec<Doctor>> {
        let tables = self.tables.lock().await;
        let mut doctors: Vec<Doctor> = tables
            .doctors
            .values()
            .filter(|d| d.clinic_id == clinic_id && (include_inactive || d.active))
            .cloned()
            .collect();
        doctors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(doctors)
    }

    async fn get_doctor(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Doctor>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .doctors
            .get(&id)
            .filter(|d| d.clinic_id == clinic_id)
            .cloned())
    }

    async fn insert_doctor(&self, doctor: &Doctor) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.doctors.insert(doctor.id, doctor.clone());
        Ok(())
    }

    async fn update_doctor(&self, doctor: &Doctor) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.doctors.get_mut(&doctor.id) {
            Some(existing) => {
                *existing = doctor.clone();
                Ok(())
            }
            None => Err(Error::not_found("doctor", doctor.id)),
        }
    }

    async fn list_patients(
        &self,
        clinic_id: Uuid,
        search: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Patient>> {
        let tables = self.tables.lock().await;
        let needle = search.map(|s| s.trim().to_lowercase());
        let mut patients: Vec<Patient> = tables
            .patients
            .values()
            .filter(|p| p.clinic_id == clinic_id)
            .filter(|p| match &needle {
                Some(n) => p.name.to_lowercase().starts_with(n) || p.phone.starts_with(n),
                None => true,
            })
            .cloned()
            .collect();
        patients.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        patients.truncate(limit.max(0) as usize);
        Ok(patients)
    }

    async fn get_patient(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Patient>> {
        Ok(self.tables.lock().await.patient(clinic_id, id))
    }

    async fn insert_patient(&self, patient: &Patient) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.check_patient_phone(patient)?;
        tables.patients.insert(patient.id, patient.clone());
        Ok(())
    }

    async fn update_patient(&self, patient: &Patient) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.check_patient_phone(patient)?;
        match tables.patients.get_mut(&patient.id) {
            Some(existing) => {
                *existing = patient.clone();
                Ok(())
            }
            None => Err(Error::not_found("patient", patient.id)),
        }
    }

    async fn get_entry(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<QueueEntry>> {
        Ok(self.tables.lock().await.entry(clinic_id, id))
    }

    async fn find_entry(&self, id: Uuid) -> Result<Option<QueueEntry>> {
        Ok(self.tables.lock().await.entries.get(&id).cloned())
    }

    async fn list_entries(
        &self,
        clinic_id: Uuid,
        filter: &EntryFilter,
        day: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<QueueEntry>> {
        let tables = self.tables.lock().await;
        let mut entries: Vec<QueueEntry> = tables
            .entries
            .values()
            .filter(|e| e.clinic_id == clinic_id)
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .filter(|e| day.map_or(true, |(start, end)| start <= e.checked_in_at && e.checked_in_at < end))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.is_active()
                .cmp(&a.is_active())
                .then(a.position.cmp(&b.position))
                .then(a.checked_in_at.cmp(&b.checked_in_at))
        });
        Ok(entries)
    }

    async fn active_entries(&self, clinic_id: Uuid) -> Result<Vec<QueueEntry>> {
        Ok(self.tables.lock().await.active_entries(clinic_id))
    }

    async fn entries_for_stats(
        &self,
        clinic_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entries
            .values()
            .filter(|e| e.clinic_id == clinic_id)
            .filter(|e| e.is_active() || (start <= e.checked_in_at && e.checked_in_at < end))
            .cloned()
            .collect())
    }

    async fn get_appointment(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Appointment>> {
        Ok(self.tables.lock().await.appointment(clinic_id, id))
    }

    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>> {
        let tables = self.tables.lock().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| a.clinic_id == clinic_id && filter.matches(a))
            .cloned()
            .collect();
        appointments.sort_by_key(|a| a.starts_at);
        Ok(appointments)
    }

    async fn doctor_busy(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        Ok(self.tables.lock().await.doctor_busy(doctor_id, start, end))
    }

    async fn overdue_appointments(&self, cutoff: DateTime<Utc>) -> Result<Vec<Appointment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .appointments
            .values()
            .filter(|a| a.status.blocks_slot() && a.ends_at < cutoff)
            .cloned()
            .collect())
    }

    async fn list_payments(&self, clinic_id: Option<Uuid>, limit: i64) -> Result<Vec<Payment>> {
        let tables = self.tables.lock().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .iter()
            .filter(|p| clinic_id.map_or(true, |id| p.clinic_id == id))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        payments.truncate(limit.max(0) as usize);
        Ok(payments)
    }

    async fn clinic_counts(&self) -> Result<Vec<ClinicCount>> {
        let tables = self.tables.lock().await;
        let mut counts: BTreeMap<(&'static str, &'static str), ClinicCount> = BTreeMap::new();
        for clinic in tables.clinics.values() {
            counts
                .entry((clinic.plan.as_str(), clinic.subscription_status.as_str()))
                .or_insert(ClinicCount {
                    plan: clinic.plan,
                    subscription_status: clinic.subscription_status,
                    count: 0,
                })
                .count += 1;
        }
        Ok(counts.into_values().collect())
    }

    async fn net_revenue_since(&self, since: DateTime<Utc>) -> Result<Decimal> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.created_at >= since)
            .fold(Decimal::ZERO, |total, p| match p.status {
                PaymentStatus::Succeeded => total + p.amount,
                PaymentStatus::Refunded => total - p.amount,
                PaymentStatus::Failed => total,
            }))
    }

    async fn count_check_ins_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entries
            .values()
            .filter(|e| e.checked_in_at >= since)
            .count() as i64)
    }

    async fn count_active_entries(&self) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables.entries.values().filter(|e| e.is_active()).count() as i64)
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    changes: broadcast::Sender<QueueChange>,
    pending: Vec<QueueChange>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_clinic(&mut self, clinic_id: Uuid) -> Result<Option<Clinic>> {
        Ok(self.working.clinics.get(&clinic_id).cloned())
    }

    async fn active_entries(&mut self, clinic_id: Uuid) -> Result<Vec<QueueEntry>> {
        Ok(self.working.active_entries(clinic_id))
    }

    async fn get_entry(&mut self, clinic_id: Uuid, id: Uuid) -> Result<Option<QueueEntry>> {
        Ok(self.working.entry(clinic_id, id))
    }

    async fn insert_entry(&mut self, entry: &QueueEntry) -> Result<()> {
        if self.working.entries.contains_key(&entry.id) {
            return Err(Error::Conflict(format!("queue entry {} exists", entry.id)));
        }
        self.working.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn update_entry(&mut self, entry: &QueueEntry) -> Result<()> {
        match self.working.entries.get_mut(&entry.id) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(Error::not_found("queue entry", entry.id)),
        }
    }

    async fn upsert_patient(&mut self, patient: &Patient) -> Result<Patient> {
        let existing = self
            .working
            .patient_by_phone(patient.clinic_id, &patient.phone)
            .map(|p| p.id);
        match existing.and_then(|id| self.working.patients.get_mut(&id)) {
            Some(stored) => {
                stored.name = patient.name.clone();
                stored.updated_at = patient.updated_at;
                Ok(stored.clone())
            }
            None => {
                self.working.patients.insert(patient.id, patient.clone());
                Ok(patient.clone())
            }
        }
    }

    async fn get_patient(&mut self, clinic_id: Uuid, id: Uuid) -> Result<Option<Patient>> {
        Ok(self.working.patient(clinic_id, id))
    }

    async fn lock_doctor(&mut self, clinic_id: Uuid, doctor_id: Uuid) -> Result<Option<Doctor>> {
        Ok(self
            .working
            .doctors
            .get(&doctor_id)
            .filter(|d| d.clinic_id == clinic_id)
            .cloned())
    }

    async fn doctor_busy(
        &mut self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        Ok(self.working.doctor_busy(doctor_id, start, end))
    }

    async fn get_appointment(
        &mut self,
        clinic_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Appointment>> {
        Ok(self.working.appointment(clinic_id, id))
    }

    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<()> {
        self.working
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<()> {
        match self.working.appointments.get_mut(&appointment.id) {
            Some(existing) => {
                *existing = appointment.clone();
                Ok(())
            }
            None => Err(Error::not_found("appointment", appointment.id)),
        }
    }

    async fn insert_clinic(&mut self, clinic: &Clinic) -> Result<()> {
        if self.working.clinics.values().any(|c| c.slug == clinic.slug) {
            return Err(Error::Conflict(format!(
                "clinic slug '{}' is already taken",
                clinic.slug
            )));
        }
        self.working.clinics.insert(clinic.id, clinic.clone());
        Ok(())
    }

    async fn update_clinic(&mut self, clinic: &Clinic) -> Result<()> {
        match self.working.clinics.get_mut(&clinic.id) {
            Some(existing) => {
                *existing = clinic.clone();
                Ok(())
            }
            None => Err(Error::not_found("clinic", clinic.id)),
        }
    }

    async fn insert_user(&mut self, user: &User) -> Result<()> {
        if self
            .working
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(Error::Conflict(format!(
                "email {} is already registered",
                user.email
            )));
        }
        self.working.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn record_webhook_event(
        &mut self,
        event_id: &str,
        _kind: &str,
        _clinic_id: Uuid,
        _received_at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.working.webhook_events.insert(event_id.to_string()))
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<bool> {
        if self
            .working
            .payments
            .iter()
            .any(|p| p.provider_event_id == payment.provider_event_id)
        {
            return Ok(false);
        }
        self.working.payments.push(payment.clone());
        Ok(true)
    }

    async fn notify_queue_change(&mut self, change: &QueueChange) -> Result<()> {
        self.pending.push(change.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            mut guard,
            working,
            changes,
            pending,
        } = *self;
        *guard = working;
        drop(guard);
        for change in pending {
            // No listeners is fine.
            let _ = changes.send(change);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_uncommitted_transaction_is_discarded() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let clinic = Clinic::new("Sunny", "sunny", now);

        let mut tx = store.begin().await.unwrap();
        tx.insert_clinic(&clinic).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.get_clinic(clinic.id).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert_clinic(&clinic).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.get_clinic_by_slug("sunny").await.unwrap(), Some(clinic));
    }

    #[tokio::test]
    async fn test_duplicate_slug_and_payment_event() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let clinic = Clinic::new("Sunny", "sunny", now);

        let mut tx = store.begin().await.unwrap();
        tx.insert_clinic(&clinic).await.unwrap();
        let again = Clinic::new("Other", "sunny", now);
        assert!(matches!(tx.insert_clinic(&again).await, Err(Error::Conflict(_))));

        let payment = Payment {
            id: Uuid::new_v4(),
            clinic_id: clinic.id,
            provider_event_id: "evt_1".to_string(),
            status: PaymentStatus::Succeeded,
            amount: Decimal::new(4900, 2),
            currency: "USD".to_string(),
            plan: None,
            created_at: now,
        };
        assert!(tx.insert_payment(&payment).await.unwrap());
        assert!(!tx.insert_payment(&payment).await.unwrap());
        tx.commit().await.unwrap();

        let revenue = store
            .net_revenue_since(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(revenue, Decimal::new(4900, 2));
    }

    #[tokio::test]
    async fn test_upsert_patient_matches_on_phone() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let clinic = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let first = tx
            .upsert_patient(&Patient::new(clinic, "Ada", "+15550001111", now))
            .await
            .unwrap();
        let second = tx
            .upsert_patient(&Patient::new(clinic, "Ada Lovelace", "+15550001111", now))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Ada Lovelace");
        assert_eq!(store.list_patients(clinic, None, 10).await.unwrap().len(), 1);
    }
}
