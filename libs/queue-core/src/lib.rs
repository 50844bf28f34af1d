//! Queue domain rules for clinicq
//!
//! This crate holds the IO-free business logic shared by the server, the
//! background worker and the CLI:
//!
//! - `status`: queue, appointment, plan and role enumerations
//! - `entry`: the queue entry model
//! - `reconcile`: position/status renumbering of a clinic's active queue
//! - `checkin`: phone normalization and the duplicate check-in guard
//! - `schedule`: appointment overlap detection and slot search
//! - `stats`: wait-time statistics and estimates
//!
//! # Example
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use clinicq_core::{reconcile, QueueEntry, QueueOrder, QueueStatus};
//! use uuid::Uuid;
//!
//! let clinic = Uuid::new_v4();
//! let now = Utc::now();
//! let first = QueueEntry::new_waiting(clinic, "Ada", "+15550001", now - Duration::minutes(5));
//! let second = QueueEntry::new_waiting(clinic, "Alan", "+15550002", now);
//!
//! let plan = reconcile(&[second.clone(), first.clone()], &QueueOrder::Arrival, now).unwrap();
//! assert_eq!(plan.assignment(first.id).unwrap().status, QueueStatus::InConsultation);
//! assert_eq!(plan.assignment(second.id).unwrap().position, 2);
//! ```

pub mod checkin;
pub mod entry;
pub mod error;
pub mod reconcile;
pub mod schedule;
pub mod stats;
pub mod status;

pub use checkin::{date_window, day_window, find_duplicate, normalize_phone, DayWindow};
pub use entry::{EntryId, QueueEntry};
pub use error::{Error, Result};
pub use reconcile::{
    current_order, move_to, reconcile, EntryAssignment, OrderingPolicy, QueueOrder, ReconcilePlan,
};
pub use schedule::{available_slots, find_conflict, overlaps, BusySlot, OpeningHours, TimeRange};
pub use stats::{estimated_wait_minutes, WaitStats};
pub use status::{AppointmentStatus, ClinicKind, Plan, QueueStatus, Role, SubscriptionStatus};
