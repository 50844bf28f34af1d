use chrono::{DateTime, NaiveTime, Utc};
use clinicq_core::{day_window, ClinicKind, DayWindow, OpeningHours, Plan, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant: owns its queue, doctors, patients and appointments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clinic {
    pub id: Uuid,
    pub name: String,
    /// URL-safe public identifier used by the check-in page.
    pub slug: String,
    pub kind: ClinicKind,
    pub plan: Plan,
    pub subscription_status: SubscriptionStatus,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Minutes east of UTC; defines the clinic's calendar day.
    pub utc_offset_minutes: i32,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub slot_minutes: i32,
    pub avg_consultation_minutes: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Clinic {
    pub fn new(name: impl Into<String>, slug: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            slug: slug.into(),
            kind: ClinicKind::Clinic,
            plan: Plan::Free,
            subscription_status: SubscriptionStatus::Trialing,
            phone: None,
            address: None,
            utc_offset_minutes: 0,
            opening_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            closing_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_minutes: 30,
            avg_consultation_minutes: 15,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn opening_hours(&self) -> OpeningHours {
        OpeningHours {
            opens_at: self.opening_time,
            closes_at: self.closing_time,
            slot_minutes: self.slot_minutes,
            utc_offset_minutes: self.utc_offset_minutes,
        }
    }

    pub fn today(&self, now: DateTime<Utc>) -> DayWindow {
        day_window(now, self.utc_offset_minutes)
    }
}

/// Lowercase `name` into a slug of `[a-z0-9-]`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
