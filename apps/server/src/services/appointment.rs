//! Appointment booking
//!
//! Bookings for one doctor are serialized by locking the doctor row, so the
//! overlap check and the insert see the same set of appointments.

use chrono::{DateTime, NaiveDate, Utc};
use clinicq_core::{
    available_slots, find_conflict, normalize_phone, AppointmentStatus, BusySlot, TimeRange,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{DynStore, StoreTransaction},
    metrics::APPOINTMENTS_TOTAL,
    models::{Appointment, AppointmentFilter, Clinic, Patient},
    realtime::{EventKind, RealtimeHub, Room},
    Error, Result,
};

const MIN_DURATION_MINUTES: i64 = 5;
const MAX_DURATION_MINUTES: i64 = 8 * 60;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 3, max = 32))]
    pub phone: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub patient_id: Option<Uuid>,
    #[validate(nested)]
    pub patient: Option<NewPatient>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    #[validate(range(min = 5, max = 480))]
    pub duration_minutes: Option<i64>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    #[validate(range(min = 5, max = 480))]
    pub duration_minutes: Option<i64>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotList {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub slot_minutes: i32,
    pub slots: Vec<TimeRange>,
}

#[derive(Clone)]
pub struct AppointmentService {
    store: DynStore,
    hub: RealtimeHub,
}

impl AppointmentService {
    pub fn new(store: DynStore, hub: RealtimeHub) -> Self {
        Self { store, hub }
    }

    #[tracing::instrument(skip(self, request), fields(doctor_id = %request.doctor_id))]
    pub async fn book(&self, clinic_id: Uuid, request: BookAppointmentRequest) -> Result<Appointment> {
        let result = self.book_inner(clinic_id, request).await;
        record("book", &result);
        result
    }

    async fn book_inner(&self, clinic_id: Uuid, request: BookAppointmentRequest) -> Result<Appointment> {
        let clinic = self.clinic(clinic_id).await?;
        let range = resolve_range(
            &clinic,
            request.starts_at,
            request.ends_at,
            request.duration_minutes,
        )?;
        let now = Utc::now();
        if range.end <= now {
            return Err(Error::Validation(
                "appointment must end in the future".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        lock_active_doctor(tx.as_mut(), clinic_id, request.doctor_id).await?;

        let patient_id = match (request.patient_id, request.patient) {
            (Some(patient_id), _) => {
                tx.get_patient(clinic_id, patient_id)
                    .await?
                    .ok_or_else(|| Error::not_found("patient", patient_id))?
                    .id
            }
            (None, Some(new_patient)) => {
                let phone = normalize_phone(&new_patient.phone)?;
                let patient = Patient::new(clinic_id, new_patient.name.trim(), phone, now);
                tx.upsert_patient(&patient).await?.id
            }
            (None, None) => {
                return Err(Error::Validation(
                    "either patientId or patient is required".to_string(),
                ))
            }
        };

        ensure_free(tx.as_mut(), request.doctor_id, &range, None).await?;

        let appointment = Appointment {
            id: Uuid::new_v4(),
            clinic_id,
            doctor_id: request.doctor_id,
            patient_id,
            starts_at: range.start,
            ends_at: range.end,
            status: AppointmentStatus::Scheduled,
            notes: clean(request.notes),
            created_at: now,
            updated_at: now,
        };
        tx.insert_appointment(&appointment).await?;
        tx.commit().await?;

        tracing::info!(appointment_id = %appointment.id, "Appointment booked");
        self.publish(EventKind::AppointmentCreated, &appointment);
        Ok(appointment)
    }

    /// Move an appointment to a new time, re-checking the doctor's calendar.
    #[tracing::instrument(skip(self, request))]
    pub async fn reschedule(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        request: RescheduleRequest,
    ) -> Result<Appointment> {
        let result = self
            .reschedule_inner(clinic_id, appointment_id, request)
            .await;
        record("reschedule", &result);
        result
    }

    async fn reschedule_inner(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        request: RescheduleRequest,
    ) -> Result<Appointment> {
        let clinic = self.clinic(clinic_id).await?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let current = tx
            .get_appointment(clinic_id, appointment_id)
            .await?
            .ok_or_else(|| Error::not_found("appointment", appointment_id))?;
        if !current.status.blocks_slot() {
            return Err(Error::Validation(format!(
                "a {} appointment cannot be rescheduled",
                current.status
            )));
        }

        let duration = request
            .duration_minutes
            .or_else(|| request.ends_at.is_none().then(|| current.range().minutes()));
        let range = resolve_range(&clinic, request.starts_at, request.ends_at, duration)?;
        if range.end <= now {
            return Err(Error::Validation(
                "appointment must end in the future".to_string(),
            ));
        }

        lock_active_doctor(tx.as_mut(), clinic_id, current.doctor_id).await?;
        ensure_free(tx.as_mut(), current.doctor_id, &range, Some(current.id)).await?;

        let mut appointment = current;
        appointment.starts_at = range.start;
        appointment.ends_at = range.end;
        if request.notes.is_some() {
            appointment.notes = clean(request.notes);
        }
        appointment.updated_at = now;
        tx.update_appointment(&appointment).await?;
        tx.commit().await?;

        self.publish(EventKind::AppointmentUpdated, &appointment);
        Ok(appointment)
    }

    /// Change an appointment's status. Closed appointments cannot be reopened.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment> {
        let mut tx = self.store.begin().await?;
        let mut appointment = tx
            .get_appointment(clinic_id, appointment_id)
            .await?
            .ok_or_else(|| Error::not_found("appointment", appointment_id))?;

        if appointment.status == status {
            return Ok(appointment);
        }
        if !appointment.status.blocks_slot() {
            return Err(Error::Validation(format!(
                "appointment is already {}",
                appointment.status
            )));
        }
        if status == AppointmentStatus::Scheduled {
            return Err(Error::Validation(
                "a confirmed appointment cannot go back to SCHEDULED".to_string(),
            ));
        }

        appointment.status = status;
        appointment.updated_at = Utc::now();
        tx.update_appointment(&appointment).await?;
        tx.commit().await?;

        let kind = if status == AppointmentStatus::Cancelled {
            EventKind::AppointmentCancelled
        } else {
            EventKind::AppointmentUpdated
        };
        APPOINTMENTS_TOTAL.with_label_values(&["status", "ok"]).inc();
        self.publish(kind, &appointment);
        Ok(appointment)
    }

    pub async fn cancel(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Appointment> {
        self.update_status(clinic_id, appointment_id, AppointmentStatus::Cancelled)
            .await
    }

    pub async fn list(&self, clinic_id: Uuid, filter: &AppointmentFilter) -> Result<Vec<Appointment>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if to <= from {
                return Err(Error::Validation("'to' must be after 'from'".to_string()));
            }
        }
        self.store.list_appointments(clinic_id, filter).await
    }

    pub async fn get(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Appointment> {
        self.store
            .get_appointment(clinic_id, appointment_id)
            .await?
            .ok_or_else(|| Error::not_found("appointment", appointment_id))
    }

    /// Free slots of `doctor_id` on the clinic-local `date`.
    pub async fn available_slots(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<SlotList> {
        let clinic = self.clinic(clinic_id).await?;
        match self.store.get_doctor(clinic_id, doctor_id).await? {
            Some(doctor) if doctor.active => {}
            _ => return Err(Error::not_found("doctor", doctor_id)),
        }

        let hours = clinic.opening_hours();
        let window = hours.window(date)?;
        let busy: Vec<TimeRange> = self
            .store
            .doctor_busy(doctor_id, window.start, window.end)
            .await?
            .iter()
            .map(Appointment::range)
            .collect();

        Ok(SlotList {
            doctor_id,
            date,
            slot_minutes: clinic.slot_minutes,
            slots: available_slots(date, &hours, &busy, Utc::now())?,
        })
    }

    /// Mark SCHEDULED / CONFIRMED appointments that ended before `cutoff` as NO_SHOW.
    pub async fn close_overdue(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let overdue = self.store.overdue_appointments(cutoff).await?;
        let mut closed = 0;
        for candidate in overdue {
            let mut tx = self.store.begin().await?;
            let Some(mut appointment) = tx
                .get_appointment(candidate.clinic_id, candidate.id)
                .await?
            else {
                continue;
            };
            if !appointment.status.blocks_slot() || appointment.ends_at >= cutoff {
                continue;
            }
            appointment.status = AppointmentStatus::NoShow;
            appointment.updated_at = Utc::now();
            tx.update_appointment(&appointment).await?;
            tx.commit().await?;

            self.publish(EventKind::AppointmentUpdated, &appointment);
            closed += 1;
        }
        Ok(closed)
    }

    async fn clinic(&self, clinic_id: Uuid) -> Result<Clinic> {
        self.store
            .get_clinic(clinic_id)
            .await?
            .ok_or_else(|| Error::not_found("clinic", clinic_id))
    }

    fn publish(&self, kind: EventKind, appointment: &Appointment) {
        self.hub.publish(
            Room::Clinic(appointment.clinic_id),
            kind,
            json!({ "appointment": appointment }),
        );
    }
}

/// The booked range: explicit end, else `duration_minutes`, else one clinic slot.
fn resolve_range(
    clinic: &Clinic,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
    duration_minutes: Option<i64>,
) -> Result<TimeRange> {
    let range = match (ends_at, duration_minutes) {
        (Some(end), _) => TimeRange::new(starts_at, end)?,
        (None, Some(minutes)) => TimeRange::from_duration(starts_at, minutes)?,
        (None, None) => TimeRange::from_duration(starts_at, clinic.slot_minutes as i64)?,
    };
    let minutes = range.minutes();
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(Error::Validation(format!(
            "appointment length must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes"
        )));
    }
    Ok(range)
}

async fn lock_active_doctor(
    tx: &mut dyn StoreTransaction,
    clinic_id: Uuid,
    doctor_id: Uuid,
) -> Result<()> {
    match tx.lock_doctor(clinic_id, doctor_id).await? {
        Some(doctor) if doctor.active => Ok(()),
        _ => Err(Error::not_found("doctor", doctor_id)),
    }
}

async fn ensure_free(
    tx: &mut dyn StoreTransaction,
    doctor_id: Uuid,
    range: &TimeRange,
    exclude: Option<Uuid>,
) -> Result<()> {
    let busy: Vec<BusySlot> = tx
        .doctor_busy(doctor_id, range.start, range.end)
        .await?
        .iter()
        .map(Appointment::busy_slot)
        .collect();
    match find_conflict(&busy, range, exclude) {
        Some(conflict) => Err(Error::Conflict(format!(
            "doctor is already booked from {} to {}",
            conflict.range.start, conflict.range.end
        ))),
        None => Ok(()),
    }
}

fn clean(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

fn record<T>(kind: &str, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(Error::Conflict(_)) => "conflict",
        Err(_) => "error",
    };
    APPOINTMENTS_TOTAL.with_label_values(&[kind, outcome]).inc();
}
