//! Records persisted by the clinicq store
//!
//! Queue entries live in `clinicq_core`; everything else a clinic owns is
//! defined here.

pub mod appointment;
pub mod billing;
pub mod clinic;
pub mod patient;
pub mod staff;

pub use appointment::{Appointment, AppointmentFilter};
pub use billing::{ClinicCount, Payment, PaymentStatus};
pub use clinic::Clinic;
pub use clinicq_core::QueueEntry;
pub use patient::Patient;
pub use staff::{Doctor, User};

use chrono::NaiveDate;
use clinicq_core::QueueStatus;
use serde::Deserialize;

/// Filter for listing a clinic's queue entries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryFilter {
    pub status: Option<QueueStatus>,
    /// Clinic-local calendar day of check-in.
    pub date: Option<NaiveDate>,
}
