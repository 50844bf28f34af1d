//! Position/status reconciliation for a clinic's active queue
//!
//! After every queue mutation the active entries (WAITING, NOTIFIED,
//! IN_CONSULTATION) are put in order and renumbered 1..N:
//!
//! - position 1 is IN_CONSULTATION (`called_at` stamped once)
//! - position 2 is NOTIFIED (`notified_at` stamped once)
//! - every later position is WAITING
//!
//! `reconcile` is pure: it returns a [`ReconcilePlan`] describing the new
//! position and status of every active entry, and the caller persists the
//! assignments that changed.

use crate::{
    entry::{EntryId, QueueEntry},
    error::{Error, Result},
    status::QueueStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// How the active entries are ordered before renumbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOrder {
    /// By check-in time (ties broken by creation time, then id).
    Arrival,
    /// Listed ids first, in list order; unlisted active entries follow by arrival.
    Manual(Vec<EntryId>),
}

/// Ordering applied by mutations other than an explicit reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Re-sort by arrival on every mutation; a manual reorder lasts until the next one.
    #[default]
    Arrival,
    /// Keep the current relative order and append new arrivals at the tail.
    PreserveManual,
}

impl OrderingPolicy {
    pub fn order_for(&self, entries: &[QueueEntry]) -> QueueOrder {
        match self {
            OrderingPolicy::Arrival => QueueOrder::Arrival,
            OrderingPolicy::PreserveManual => QueueOrder::Manual(current_order(entries)),
        }
    }
}

/// New position and status for one active entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryAssignment {
    pub id: EntryId,
    pub position: i32,
    pub status: QueueStatus,
    pub notified_at: Option<DateTime<Utc>>,
    pub called_at: Option<DateTime<Utc>>,
    pub previous_position: i32,
    pub previous_status: QueueStatus,
    pub changed: bool,
}

impl EntryAssignment {
    pub fn status_changed(&self) -> bool {
        self.status != self.previous_status
    }

    pub fn position_changed(&self) -> bool {
        self.position != self.previous_position
    }

    /// Write this assignment onto the entry it was computed for.
    pub fn apply_to(&self, entry: &mut QueueEntry, now: DateTime<Utc>) {
        debug_assert_eq!(entry.id, self.id);
        if !self.changed {
            return;
        }
        entry.position = self.position;
        entry.status = self.status;
        entry.notified_at = self.notified_at;
        entry.called_at = self.called_at;
        entry.updated_at = now;
    }
}

/// Result of reconciling a clinic's queue, in queue order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcilePlan {
    assignments: Vec<EntryAssignment>,
}

impl ReconcilePlan {
    pub fn assignments(&self) -> &[EntryAssignment] {
        &self.assignments
    }

    pub fn assignment(&self, id: EntryId) -> Option<&EntryAssignment> {
        self.assignments.iter().find(|a| a.id == id)
    }

    /// Assignments that must be persisted.
    pub fn changed(&self) -> impl Iterator<Item = &EntryAssignment> {
        self.assignments.iter().filter(|a| a.changed)
    }

    /// Entries whose status or position moved; these get a patient notification.
    pub fn moved(&self) -> impl Iterator<Item = &EntryAssignment> {
        self.assignments
            .iter()
            .filter(|a| a.status_changed() || a.position_changed())
    }

    pub fn status_changes(&self) -> impl Iterator<Item = &EntryAssignment> {
        self.assignments.iter().filter(|a| a.status_changed())
    }

    pub fn is_noop(&self) -> bool {
        self.assignments.iter().all(|a| !a.changed)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Apply the plan to a slice of entries in place. Entries without an
    /// assignment (inactive ones) are left untouched.
    pub fn apply(&self, entries: &mut [QueueEntry], now: DateTime<Utc>) {
        let by_id: HashMap<EntryId, &EntryAssignment> =
            self.assignments.iter().map(|a| (a.id, a)).collect();
        for entry in entries.iter_mut() {
            if let Some(assignment) = by_id.get(&entry.id) {
                assignment.apply_to(entry, now);
            }
        }
    }
}

fn arrival_cmp(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    a.checked_in_at
        .cmp(&b.checked_in_at)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Active entry ids in their current queue order.
///
/// Entries that already hold a position come first, by position; entries
/// without one (position 0, freshly inserted or re-queued) follow by arrival.
pub fn current_order(entries: &[QueueEntry]) -> Vec<EntryId> {
    let mut active: Vec<&QueueEntry> = entries.iter().filter(|e| e.is_active()).collect();
    active.sort_by(|a, b| {
        let a_key = if a.position > 0 { a.position } else { i32::MAX };
        let b_key = if b.position > 0 { b.position } else { i32::MAX };
        a_key.cmp(&b_key).then_with(|| arrival_cmp(a, b))
    });
    active.into_iter().map(|e| e.id).collect()
}

/// Renumber the active entries and derive their statuses.
///
/// # Errors
/// * `UnknownEntry` - a manual order lists an id that is not an active entry
/// * `DuplicateEntry` - a manual order lists the same id twice
pub fn reconcile(
    entries: &[QueueEntry],
    order: &QueueOrder,
    now: DateTime<Utc>,
) -> Result<ReconcilePlan> {
    let active: Vec<&QueueEntry> = entries.iter().filter(|e| e.is_active()).collect();

    let ordered: Vec<&QueueEntry> = match order {
        QueueOrder::Arrival => {
            let mut ordered = active;
            ordered.sort_by(|a, b| arrival_cmp(a, b));
            ordered
        }
        QueueOrder::Manual(ids) => {
            let by_id: HashMap<EntryId, &QueueEntry> = active.iter().map(|e| (e.id, *e)).collect();
            let mut seen: HashSet<EntryId> = HashSet::with_capacity(ids.len());
            let mut ordered = Vec::with_capacity(active.len());

            for id in ids {
                let entry = by_id.get(id).ok_or(Error::UnknownEntry(*id))?;
                if !seen.insert(*id) {
                    return Err(Error::DuplicateEntry(*id));
                }
                ordered.push(*entry);
            }

            let mut rest: Vec<&QueueEntry> = active
                .iter()
                .filter(|e| !seen.contains(&e.id))
                .copied()
                .collect();
            rest.sort_by(|a, b| arrival_cmp(a, b));
            ordered.extend(rest);
            ordered
        }
    };

    let assignments = ordered
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            let position = idx as i32 + 1;
            let status = QueueStatus::for_position(position);

            let called_at = match (status, entry.called_at) {
                (QueueStatus::InConsultation, None) => Some(now),
                (_, existing) => existing,
            };
            let notified_at = match (status, entry.notified_at) {
                (QueueStatus::Notified, None) => Some(now),
                (_, existing) => existing,
            };

            let changed = position != entry.position
                || status != entry.status
                || called_at != entry.called_at
                || notified_at != entry.notified_at;

            EntryAssignment {
                id: entry.id,
                position,
                status,
                notified_at,
                called_at,
                previous_position: entry.position,
                previous_status: entry.status,
                changed,
            }
        })
        .collect();

    Ok(ReconcilePlan { assignments })
}

/// Build the manual order that places `id` at `new_position` (1-based).
///
/// The position is clamped to the queue length; every other active entry
/// keeps its current relative order.
pub fn move_to(entries: &[QueueEntry], id: EntryId, new_position: i32) -> Result<QueueOrder> {
    let mut ids = current_order(entries);
    let current = ids
        .iter()
        .position(|candidate| *candidate == id)
        .ok_or(Error::UnknownEntry(id))?;

    ids.remove(current);
    let target = (new_position.max(1) as usize - 1).min(ids.len());
    ids.insert(target, id);

    Ok(QueueOrder::Manual(ids))
}
