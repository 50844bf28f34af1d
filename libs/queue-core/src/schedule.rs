//! Appointment scheduling rules: overlap detection and free-slot search

use crate::{
    checkin::clinic_offset,
    error::{Error, Result},
    status::AppointmentStatus,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidRange(format!(
                "end ({end}) must be after start ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn from_duration(start: DateTime<Utc>, minutes: i64) -> Result<Self> {
        Self::new(start, start + Duration::minutes(minutes))
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        overlaps(self, other)
    }
}

pub fn overlaps(a: &TimeRange, b: &TimeRange) -> bool {
    a.start < b.end && b.start < a.end
}

/// An existing appointment as seen by the conflict check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusySlot {
    pub id: Uuid,
    pub range: TimeRange,
    pub status: AppointmentStatus,
}

/// First appointment that blocks its slot and overlaps `candidate`.
///
/// `exclude` skips the appointment being rescheduled.
pub fn find_conflict<'a>(
    existing: &'a [BusySlot],
    candidate: &TimeRange,
    exclude: Option<Uuid>,
) -> Option<&'a BusySlot> {
    existing.iter().find(|slot| {
        Some(slot.id) != exclude && slot.status.blocks_slot() && slot.range.overlaps(candidate)
    })
}

/// A clinic's bookable day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpeningHours {
    pub opens_at: NaiveTime,
    pub closes_at: NaiveTime,
    pub slot_minutes: i32,
    pub utc_offset_minutes: i32,
}

impl OpeningHours {
    pub fn validate(&self) -> Result<()> {
        if self.slot_minutes <= 0 {
            return Err(Error::InvalidRange(
                "slot length must be positive".to_string(),
            ));
        }
        if self.closes_at <= self.opens_at {
            return Err(Error::InvalidRange(format!(
                "closing time {} must be after opening time {}",
                self.closes_at, self.opens_at
            )));
        }
        Ok(())
    }

    /// The opening window of `date` (clinic-local) in UTC.
    pub fn window(&self, date: NaiveDate) -> Result<TimeRange> {
        self.validate()?;
        let offset = clinic_offset(self.utc_offset_minutes);
        let to_utc = |time: NaiveTime| {
            offset
                .from_local_datetime(&date.and_time(time))
                .single()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| Error::InvalidRange(format!("{date} {time} is not a valid local time")))
        };
        TimeRange::new(to_utc(self.opens_at)?, to_utc(self.closes_at)?)
    }
}

/// Free slots of `slot_minutes` on `date`, skipping busy ranges and slots
/// that start before `now`.
pub fn available_slots(
    date: NaiveDate,
    hours: &OpeningHours,
    busy: &[TimeRange],
    now: DateTime<Utc>,
) -> Result<Vec<TimeRange>> {
    let window = hours.window(date)?;
    let step = Duration::minutes(hours.slot_minutes as i64);

    let mut slots = Vec::new();
    let mut start = window.start;
    while start + step <= window.end {
        let slot = TimeRange {
            start,
            end: start + step,
        };
        if slot.start >= now && !busy.iter().any(|b| b.overlaps(&slot)) {
            slots.push(slot);
        }
        start += step;
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, h, m, 0).unwrap()
    }

    fn hours() -> OpeningHours {
        OpeningHours {
            opens_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            closes_at: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            slot_minutes: 30,
            utc_offset_minutes: 0,
        }
    }

    #[test]
    fn touching_ranges_do_not_overlap() {
        let a = TimeRange::new(at(9, 0), at(9, 30)).unwrap();
        let b = TimeRange::new(at(9, 30), at(10, 0)).unwrap();
        let c = TimeRange::new(at(9, 15), at(9, 45)).unwrap();
        assert!(!overlaps(&a, &b));
        assert!(overlaps(&a, &c));
        assert!(overlaps(&c, &b));
    }

    #[test]
    fn empty_range_is_invalid() {
        assert!(TimeRange::new(at(9, 0), at(9, 0)).is_err());
        assert!(TimeRange::from_duration(at(9, 0), -5).is_err());
        assert_eq!(TimeRange::from_duration(at(9, 0), 45).unwrap().minutes(), 45);
    }

    #[test]
    fn conflict_ignores_cancelled_and_excluded() {
        let booked = BusySlot {
            id: Uuid::new_v4(),
            range: TimeRange::new(at(9, 0), at(9, 30)).unwrap(),
            status: AppointmentStatus::Scheduled,
        };
        let cancelled = BusySlot {
            id: Uuid::new_v4(),
            range: TimeRange::new(at(10, 0), at(10, 30)).unwrap(),
            status: AppointmentStatus::Cancelled,
        };
        let existing = vec![booked.clone(), cancelled];

        let candidate = TimeRange::new(at(9, 15), at(9, 45)).unwrap();
        assert_eq!(find_conflict(&existing, &candidate, None), Some(&booked));
        assert_eq!(find_conflict(&existing, &candidate, Some(booked.id)), None);

        let late = TimeRange::new(at(10, 0), at(10, 30)).unwrap();
        assert_eq!(find_conflict(&existing, &late, None), None);
    }

    #[test]
    fn slots_skip_busy_and_past() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let busy = vec![TimeRange::new(at(9, 30), at(10, 0)).unwrap()];

        let slots = available_slots(date, &hours(), &busy, at(8, 0)).unwrap();
        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![at(9, 0), at(10, 0), at(10, 30)]);

        let slots = available_slots(date, &hours(), &busy, at(10, 10)).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].start, at(10, 30));
    }

    #[test]
    fn slots_follow_clinic_offset() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let mut east = hours();
        east.utc_offset_minutes = 60;
        let slots = available_slots(date, &east, &[], at(0, 0)).unwrap();
        assert_eq!(slots[0].start, at(8, 0));
    }

    #[test]
    fn invalid_hours_are_rejected() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let mut bad = hours();
        bad.slot_minutes = 0;
        assert!(available_slots(date, &bad, &[], at(0, 0)).is_err());

        let mut inverted = hours();
        inverted.closes_at = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert!(inverted.validate().is_err());
    }
}
