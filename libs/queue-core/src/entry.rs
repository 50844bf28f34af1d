//! Queue entry model

use crate::status::QueueStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EntryId = Uuid;

/// A patient check-in in a clinic's queue.
///
/// `position` is only meaningful while the entry is active; inactive entries
/// keep their last position for history and are never renumbered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: EntryId,
    pub clinic_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub patient_name: String,
    pub phone: String,
    pub reason: Option<String>,
    pub position: i32,
    pub status: QueueStatus,
    pub checked_in_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// A fresh WAITING entry with no position assigned yet.
    pub fn new_waiting(
        clinic_id: Uuid,
        patient_name: impl Into<String>,
        phone: impl Into<String>,
        checked_in_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            clinic_id,
            patient_id: None,
            doctor_id: None,
            patient_name: patient_name.into(),
            phone: phone.into(),
            reason: None,
            position: 0,
            status: QueueStatus::Waiting,
            checked_in_at,
            notified_at: None,
            called_at: None,
            completed_at: None,
            cancelled_at: None,
            created_at: checked_in_at,
            updated_at: checked_in_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Move the entry out of the active set, stamping the matching timestamp.
    ///
    /// Returns `false` when `status` is not terminal.
    pub fn close(&mut self, status: QueueStatus, now: DateTime<Utc>) -> bool {
        match status {
            QueueStatus::Completed => {
                self.completed_at = Some(now);
                if self.called_at.is_none() {
                    self.called_at = Some(now);
                }
            }
            QueueStatus::Cancelled | QueueStatus::NoShow => {
                self.cancelled_at = Some(now);
            }
            _ => return false,
        }
        self.status = status;
        self.updated_at = now;
        true
    }

    /// Put an inactive entry back at the tail of the queue.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Waiting;
        self.position = 0;
        self.checked_in_at = now;
        self.notified_at = None;
        self.called_at = None;
        self.completed_at = None;
        self.cancelled_at = None;
        self.updated_at = now;
    }

    /// Minutes between check-in and being called, if called.
    pub fn wait_minutes(&self) -> Option<f64> {
        self.called_at
            .map(|called| (called - self.checked_in_at).num_seconds().max(0) as f64 / 60.0)
    }

    /// Minutes between being called and completion, if completed.
    pub fn consultation_minutes(&self) -> Option<f64> {
        match (self.called_at, self.completed_at) {
            (Some(called), Some(done)) => Some((done - called).num_seconds().max(0) as f64 / 60.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn close_completed_backfills_called_at() {
        let now = Utc::now();
        let mut entry = QueueEntry::new_waiting(Uuid::new_v4(), "Grace", "+15551234", now);
        assert!(entry.close(QueueStatus::Completed, now + Duration::minutes(3)));
        assert_eq!(entry.status, QueueStatus::Completed);
        assert_eq!(entry.called_at, entry.completed_at);
    }

    #[test]
    fn close_rejects_active_status() {
        let now = Utc::now();
        let mut entry = QueueEntry::new_waiting(Uuid::new_v4(), "Grace", "+15551234", now);
        assert!(!entry.close(QueueStatus::Notified, now));
        assert_eq!(entry.status, QueueStatus::Waiting);
    }

    #[test]
    fn requeue_clears_timestamps() {
        let now = Utc::now();
        let mut entry = QueueEntry::new_waiting(Uuid::new_v4(), "Grace", "+15551234", now);
        entry.close(QueueStatus::NoShow, now);
        entry.requeue(now + Duration::hours(1));
        assert_eq!(entry.status, QueueStatus::Waiting);
        assert!(entry.cancelled_at.is_none());
        assert_eq!(entry.checked_in_at, now + Duration::hours(1));
    }

    #[test]
    fn durations_in_minutes() {
        let now = Utc::now();
        let mut entry = QueueEntry::new_waiting(Uuid::new_v4(), "Grace", "+15551234", now);
        entry.called_at = Some(now + Duration::minutes(12));
        entry.completed_at = Some(now + Duration::minutes(20));
        assert_eq!(entry.wait_minutes(), Some(12.0));
        assert_eq!(entry.consultation_minutes(), Some(8.0));
    }
}
