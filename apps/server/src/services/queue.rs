//! Queue service
//!
//! Every mutation follows the same sequence inside one transaction:
//! lock the clinic row, load its active entries, apply the change, reconcile
//! positions and statuses, persist changed rows, commit. Events are published
//! only after the commit succeeds.

use chrono::{DateTime, Utc};
use clinicq_core::{
    current_order, date_window, estimated_wait_minutes, find_duplicate, move_to,
    normalize_phone, reconcile, EntryId, OrderingPolicy, QueueOrder, QueueStatus, ReconcilePlan,
    WaitStats,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{DynStore, QueueChange, StoreTransaction},
    metrics::{CHECK_INS_TOTAL, QUEUE_ENTRIES_RENUMBERED, QUEUE_MUTATIONS_TOTAL},
    models::{Clinic, EntryFilter, Patient, QueueEntry},
    realtime::{EventKind, RealtimeHub, Room},
    Error, Result,
};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 3, max = 32))]
    pub phone: String,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInChannel {
    Staff,
    Public,
}

impl CheckInChannel {
    fn as_str(&self) -> &'static str {
        match self {
            CheckInChannel::Staff => "staff",
            CheckInChannel::Public => "public",
        }
    }
}

/// A queue entry together with what the patient wants to know about it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTicket {
    pub entry: QueueEntry,
    pub people_ahead: i32,
    pub estimated_wait_minutes: i64,
}

/// Public, unauthenticated view of a single entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientView {
    pub entry_id: EntryId,
    pub clinic_name: String,
    pub clinic_slug: String,
    pub patient_name: String,
    pub status: QueueStatus,
    /// `None` once the entry has left the queue.
    pub position: Option<i32>,
    pub people_ahead: i32,
    pub estimated_wait_minutes: i64,
    pub checked_in_at: DateTime<Utc>,
}

/// A pending change to one clinic's queue, reconciled by [`QueueService::commit`].
struct Mutation {
    kind: &'static str,
    clinic: Clinic,
    active: Vec<QueueEntry>,
    order: QueueOrder,
    inserted: Option<EntryId>,
    closed: Vec<QueueEntry>,
}

/// The committed result of a mutation.
struct Committed {
    active: Vec<QueueEntry>,
    closed: Vec<QueueEntry>,
}

impl Committed {
    fn find(&self, id: EntryId) -> Option<&QueueEntry> {
        self.active
            .iter()
            .chain(self.closed.iter())
            .find(|e| e.id == id)
    }
}

#[derive(Clone)]
pub struct QueueService {
    store: DynStore,
    hub: RealtimeHub,
    policy: OrderingPolicy,
    default_avg_minutes: i32,
}

impl QueueService {
    pub fn new(
        store: DynStore,
        hub: RealtimeHub,
        policy: OrderingPolicy,
        default_avg_minutes: i32,
    ) -> Self {
        Self {
            store,
            hub,
            policy,
            default_avg_minutes,
        }
    }

    /// Origin stamped on the queue changes this service announces.
    pub fn origin(&self) -> Uuid {
        self.hub.origin()
    }

    #[tracing::instrument(skip(self, request, channel), fields(channel = channel.as_str()))]
    pub async fn check_in(
        &self,
        clinic_id: Uuid,
        request: CheckInRequest,
        channel: CheckInChannel,
    ) -> Result<QueueTicket> {
        let result = self.check_in_inner(clinic_id, request).await;
        let outcome = match &result {
            Ok(_) => "accepted",
            Err(Error::Conflict(_)) => "duplicate",
            Err(_) => "rejected",
        };
        CHECK_INS_TOTAL
            .with_label_values(&[channel.as_str(), outcome])
            .inc();
        result
    }

    async fn check_in_inner(&self, clinic_id: Uuid, request: CheckInRequest) -> Result<QueueTicket> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("name must not be blank".to_string()));
        }
        let phone = normalize_phone(&request.phone)?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let (clinic, mut active) = lock_queue(tx.as_mut(), clinic_id).await?;
        if !clinic.is_active {
            return Err(Error::Forbidden(
                "This clinic is not accepting check-ins".to_string(),
            ));
        }

        if let Some(existing) = find_duplicate(&active, &phone, clinic.today(now)) {
            return Err(Error::Conflict(format!(
                "{phone} is already checked in today (entry {})",
                existing.id
            )));
        }

        if let Some(doctor_id) = request.doctor_id {
            match tx.lock_doctor(clinic_id, doctor_id).await? {
                Some(doctor) if doctor.active => {}
                _ => return Err(Error::not_found("doctor", doctor_id)),
            }
        }

        let patient = match request.patient_id {
            Some(patient_id) => tx
                .get_patient(clinic_id, patient_id)
                .await?
                .ok_or_else(|| Error::not_found("patient", patient_id))?,
            None => {
                tx.upsert_patient(&Patient::new(clinic_id, name.as_str(), phone.as_str(), now))
                    .await?
            }
        };

        let mut entry = QueueEntry::new_waiting(clinic_id, name, phone, now);
        entry.patient_id = Some(patient.id);
        entry.doctor_id = request.doctor_id;
        entry.reason = request
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        let entry_id = entry.id;
        active.push(entry);

        let order = self.policy.order_for(&active);
        let committed = self
            .commit(
                tx,
                Mutation {
                    kind: "check_in",
                    clinic,
                    active,
                    order,
                    inserted: Some(entry_id),
                    closed: Vec::new(),
                },
                now,
            )
            .await?;

        let entry = committed
            .find(entry_id)
            .cloned()
            .ok_or_else(|| Error::Internal("checked-in entry missing after commit".to_string()))?;
        tracing::info!(entry_id = %entry.id, position = entry.position, "Patient checked in");
        self.ticket(entry).await
    }

    /// Cancel an active entry.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, clinic_id: Uuid, entry_id: EntryId) -> Result<QueueEntry> {
        self.close(clinic_id, entry_id, QueueStatus::Cancelled, "remove")
            .await
    }

    /// Complete the entry in consultation and promote the next one.
    ///
    /// Returns the entry now in consultation, if the queue is not empty.
    #[tracing::instrument(skip(self))]
    pub async fn call_next(&self, clinic_id: Uuid) -> Result<Option<QueueEntry>> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let (clinic, mut active) = lock_queue(tx.as_mut(), clinic_id).await?;

        let mut closed = Vec::new();
        if let Some(idx) = active
            .iter()
            .position(|e| e.status == QueueStatus::InConsultation)
        {
            let mut done = active.remove(idx);
            done.close(QueueStatus::Completed, now);
            closed.push(done);
        }

        let order = self.policy.order_for(&active);
        let committed = self
            .commit(
                tx,
                Mutation {
                    kind: "call_next",
                    clinic,
                    active,
                    order,
                    inserted: None,
                    closed,
                },
                now,
            )
            .await?;

        Ok(committed
            .active
            .into_iter()
            .find(|e| e.status == QueueStatus::InConsultation))
    }

    /// Move an active entry to `new_position` (clamped to the queue length).
    #[tracing::instrument(skip(self))]
    pub async fn reorder(
        &self,
        clinic_id: Uuid,
        entry_id: EntryId,
        new_position: i32,
    ) -> Result<QueueEntry> {
        if new_position < 1 {
            return Err(Error::Validation("position must be at least 1".to_string()));
        }
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let (clinic, active) = lock_queue(tx.as_mut(), clinic_id).await?;
        require_active(tx.as_mut(), &active, clinic_id, entry_id).await?;

        let order = move_to(&active, entry_id, new_position)?;
        let committed = self
            .commit(
                tx,
                Mutation {
                    kind: "reorder",
                    clinic,
                    active,
                    order,
                    inserted: None,
                    closed: Vec::new(),
                },
                now,
            )
            .await?;
        committed
            .find(entry_id)
            .cloned()
            .ok_or_else(|| Error::not_found("queue entry", entry_id))
    }

    /// Set an entry's status.
    ///
    /// Terminal targets close the entry. Active targets are positional:
    /// IN_CONSULTATION moves to 1, NOTIFIED to 2, WAITING moves an entry at 1
    /// or 2 down to 3 and re-queues an inactive entry at the tail.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        clinic_id: Uuid,
        entry_id: EntryId,
        status: QueueStatus,
    ) -> Result<QueueEntry> {
        if status.is_terminal() {
            return self.close(clinic_id, entry_id, status, "status").await;
        }

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let (clinic, mut active) = lock_queue(tx.as_mut(), clinic_id).await?;

        let current = match active.iter().find(|e| e.id == entry_id) {
            Some(entry) => entry.clone(),
            None => {
                let mut entry = tx
                    .get_entry(clinic_id, entry_id)
                    .await?
                    .ok_or_else(|| Error::not_found("queue entry", entry_id))?;
                if status != QueueStatus::Waiting {
                    return Err(Error::Validation(format!(
                        "entry is {}; only WAITING can re-queue it",
                        entry.status
                    )));
                }
                entry.requeue(now);
                entry
            }
        };

        let order = if !current.is_active() {
            active.push(current);
            self.policy.order_for(&active)
        } else {
            match status {
                QueueStatus::InConsultation => move_to(&active, entry_id, 1)?,
                QueueStatus::Notified => move_to(&active, entry_id, 2)?,
                _ if current.position <= 2 => move_to(&active, entry_id, 3)?,
                _ => QueueOrder::Manual(current_order(&active)),
            }
        };

        let committed = self
            .commit(
                tx,
                Mutation {
                    kind: "status",
                    clinic,
                    active,
                    order,
                    inserted: None,
                    closed: Vec::new(),
                },
                now,
            )
            .await?;
        committed
            .find(entry_id)
            .cloned()
            .ok_or_else(|| Error::not_found("queue entry", entry_id))
    }

    async fn close(
        &self,
        clinic_id: Uuid,
        entry_id: EntryId,
        status: QueueStatus,
        kind: &'static str,
    ) -> Result<QueueEntry> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let (clinic, mut active) = lock_queue(tx.as_mut(), clinic_id).await?;

        let mut entry = match active.iter().position(|e| e.id == entry_id) {
            Some(idx) => active.remove(idx),
            None => {
                let entry = tx
                    .get_entry(clinic_id, entry_id)
                    .await?
                    .ok_or_else(|| Error::not_found("queue entry", entry_id))?;
                if kind == "remove" {
                    return Err(Error::Validation(format!(
                        "entry is {} and no longer in the queue",
                        entry.status
                    )));
                }
                entry
            }
        };
        if entry.status == status {
            return Ok(entry);
        }
        entry.close(status, now);

        let order = self.policy.order_for(&active);
        self.commit(
            tx,
            Mutation {
                kind,
                clinic,
                active,
                order,
                inserted: None,
                closed: vec![entry.clone()],
            },
            now,
        )
        .await?;
        Ok(entry)
    }

    /// Close every active entry checked in before the clinic's current day as NO_SHOW.
    ///
    /// Returns the number of entries closed.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_stale(&self, clinic_id: Uuid, now: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let (clinic, active) = lock_queue(tx.as_mut(), clinic_id).await?;
        let today = clinic.today(now);

        let (mut stale, current): (Vec<QueueEntry>, Vec<QueueEntry>) = active
            .into_iter()
            .partition(|e| e.checked_in_at < today.start);
        if stale.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }
        for entry in stale.iter_mut() {
            entry.close(QueueStatus::NoShow, now);
        }

        let count = stale.len();
        let order = self.policy.order_for(&current);
        self.commit(
            tx,
            Mutation {
                kind: "sweep",
                clinic,
                active: current,
                order,
                inserted: None,
                closed: stale,
            },
            now,
        )
        .await?;
        Ok(count)
    }

    /// Reconcile, persist and publish a mutation.
    async fn commit(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        mutation: Mutation,
        now: DateTime<Utc>,
    ) -> Result<Committed> {
        let Mutation {
            kind,
            clinic,
            mut active,
            order,
            inserted,
            closed,
        } = mutation;

        let plan = reconcile(&active, &order, now)?;
        plan.apply(&mut active, now);

        let mut changed_ids: Vec<Uuid> = Vec::with_capacity(closed.len());
        for entry in &closed {
            tx.update_entry(entry).await?;
            changed_ids.push(entry.id);
        }
        for entry in &active {
            if Some(entry.id) == inserted {
                tx.insert_entry(entry).await?;
                changed_ids.push(entry.id);
            } else if plan.assignment(entry.id).is_some_and(|a| a.changed) {
                tx.update_entry(entry).await?;
                changed_ids.push(entry.id);
            }
        }
        tx.notify_queue_change(&QueueChange {
            origin: self.hub.origin(),
            clinic_id: clinic.id,
            entry_ids: changed_ids,
        })
        .await?;
        tx.commit().await?;

        let renumbered = plan.moved().count();
        QUEUE_MUTATIONS_TOTAL.with_label_values(&[kind]).inc();
        QUEUE_ENTRIES_RENUMBERED
            .with_label_values(&[kind])
            .observe(renumbered as f64);
        tracing::debug!(
            clinic_id = %clinic.id,
            kind,
            active = active.len(),
            renumbered,
            "Queue reconciled"
        );

        active.sort_by_key(|e| e.position);
        self.publish(&clinic, &active, &closed, &plan, inserted, now)
            .await;

        Ok(Committed { active, closed })
    }

    async fn publish(
        &self,
        clinic: &Clinic,
        active: &[QueueEntry],
        closed: &[QueueEntry],
        plan: &ReconcilePlan,
        inserted: Option<EntryId>,
        now: DateTime<Utc>,
    ) {
        self.publish_board(clinic, active);

        let affected: Vec<&QueueEntry> = active
            .iter()
            .filter(|e| {
                Some(e.id) != inserted
                    && plan
                        .assignment(e.id)
                        .is_some_and(|a| a.status_changed() || a.position_changed())
            })
            .chain(closed.iter())
            .collect();
        self.publish_entries(clinic, affected, now).await;
    }

    /// Re-publish a change committed by another process to this process's rooms.
    ///
    /// Entries are reloaded, so subscribers see the current state even when
    /// several changes arrive out of order.
    #[tracing::instrument(skip(self, change), fields(clinic_id = %change.clinic_id))]
    pub async fn relay(&self, change: &QueueChange) -> Result<()> {
        let clinic = self.clinic(change.clinic_id).await?;
        let active = self.store.active_entries(clinic.id).await?;
        self.publish_board(&clinic, &active);

        let mut entries = Vec::new();
        for id in &change.entry_ids {
            if self.hub.subscriber_count(Room::Patient(*id)) == 0 {
                continue;
            }
            if let Some(entry) = self.store.get_entry(clinic.id, *id).await? {
                entries.push(entry);
            }
        }
        self.publish_entries(&clinic, entries.iter().collect(), Utc::now())
            .await;
        Ok(())
    }

    fn publish_board(&self, clinic: &Clinic, active: &[QueueEntry]) {
        self.hub.publish(
            Room::Clinic(clinic.id),
            EventKind::QueueUpdated,
            json!({ "clinicId": clinic.id, "entries": active }),
        );
    }

    /// `queue:entry` to each entry's patient room.
    async fn publish_entries(&self, clinic: &Clinic, entries: Vec<&QueueEntry>, now: DateTime<Utc>) {
        let entries: Vec<&QueueEntry> = entries
            .into_iter()
            .filter(|e| self.hub.subscriber_count(Room::Patient(e.id)) > 0)
            .collect();
        if entries.is_empty() {
            return;
        }

        let average = match self.average_consultation(clinic, now).await {
            Ok(avg) => avg,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load consultation averages");
                None
            }
        };
        for entry in entries {
            self.hub.publish(
                Room::Patient(entry.id),
                EventKind::QueueEntry,
                json!({
                    "entryId": entry.id,
                    "status": entry.status,
                    "position": entry.is_active().then_some(entry.position),
                    "peopleAhead": people_ahead(entry),
                    "estimatedWaitMinutes": self.estimate(clinic, entry, average),
                }),
            );
        }
    }

    pub async fn list(&self, clinic_id: Uuid, filter: &EntryFilter) -> Result<Vec<QueueEntry>> {
        let day = match filter.date {
            Some(date) => {
                let clinic = self.clinic(clinic_id).await?;
                let window = date_window(date, clinic.utc_offset_minutes);
                Some((window.start, window.end))
            }
            None => None,
        };
        self.store.list_entries(clinic_id, filter, day).await
    }

    pub async fn get(&self, clinic_id: Uuid, entry_id: EntryId) -> Result<QueueTicket> {
        let entry = self
            .store
            .get_entry(clinic_id, entry_id)
            .await?
            .ok_or_else(|| Error::not_found("queue entry", entry_id))?;
        self.ticket(entry).await
    }

    pub async fn stats(&self, clinic_id: Uuid) -> Result<WaitStats> {
        let clinic = self.clinic(clinic_id).await?;
        let today = clinic.today(Utc::now());
        let entries = self
            .store
            .entries_for_stats(clinic_id, today.start, today.end)
            .await?;
        Ok(WaitStats::compute(&entries, today))
    }

    /// Public lookup by entry id; the id itself is the credential.
    pub async fn patient_view(&self, entry_id: EntryId) -> Result<PatientView> {
        let entry = self
            .store
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| Error::not_found("queue entry", entry_id))?;
        let clinic = self.clinic(entry.clinic_id).await?;
        let average = self.average_consultation(&clinic, Utc::now()).await?;

        Ok(PatientView {
            entry_id: entry.id,
            clinic_name: clinic.name.clone(),
            clinic_slug: clinic.slug.clone(),
            patient_name: entry.patient_name.clone(),
            status: entry.status,
            position: entry.is_active().then_some(entry.position),
            people_ahead: people_ahead(&entry),
            estimated_wait_minutes: self.estimate(&clinic, &entry, average),
            checked_in_at: entry.checked_in_at,
        })
    }

    async fn ticket(&self, entry: QueueEntry) -> Result<QueueTicket> {
        let clinic = self.clinic(entry.clinic_id).await?;
        let average = self.average_consultation(&clinic, Utc::now()).await?;
        Ok(QueueTicket {
            people_ahead: people_ahead(&entry),
            estimated_wait_minutes: self.estimate(&clinic, &entry, average),
            entry,
        })
    }

    async fn clinic(&self, clinic_id: Uuid) -> Result<Clinic> {
        self.store
            .get_clinic(clinic_id)
            .await?
            .ok_or_else(|| Error::not_found("clinic", clinic_id))
    }

    async fn average_consultation(&self, clinic: &Clinic, now: DateTime<Utc>) -> Result<Option<f64>> {
        let today = clinic.today(now);
        let entries = self
            .store
            .entries_for_stats(clinic.id, today.start, today.end)
            .await?;
        Ok(WaitStats::compute(&entries, today).average_consultation_minutes)
    }

    fn estimate(&self, clinic: &Clinic, entry: &QueueEntry, average: Option<f64>) -> i64 {
        if !entry.is_active() {
            return 0;
        }
        let fallback = if clinic.avg_consultation_minutes > 0 {
            clinic.avg_consultation_minutes
        } else {
            self.default_avg_minutes
        };
        estimated_wait_minutes(entry.position, average, fallback)
    }
}

fn people_ahead(entry: &QueueEntry) -> i32 {
    if entry.is_active() {
        (entry.position - 1).max(0)
    } else {
        0
    }
}

async fn lock_queue(
    tx: &mut dyn StoreTransaction,
    clinic_id: Uuid,
) -> Result<(Clinic, Vec<QueueEntry>)> {
    let clinic = tx
        .lock_clinic(clinic_id)
        .await?
        .ok_or_else(|| Error::not_found("clinic", clinic_id))?;
    let active = tx.active_entries(clinic_id).await?;
    Ok((clinic, active))
}

async fn require_active(
    tx: &mut dyn StoreTransaction,
    active: &[QueueEntry],
    clinic_id: Uuid,
    entry_id: EntryId,
) -> Result<()> {
    if active.iter().any(|e| e.id == entry_id) {
        return Ok(());
    }
    match tx.get_entry(clinic_id, entry_id).await? {
        Some(entry) => Err(Error::Validation(format!(
            "entry is {} and no longer in the queue",
            entry.status
        ))),
        None => Err(Error::not_found("queue entry", entry_id)),
    }
}
