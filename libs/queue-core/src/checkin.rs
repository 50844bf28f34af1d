//! Check-in rules: phone normalization and the duplicate check-in guard

use crate::{
    entry::QueueEntry,
    error::{Error, Result},
};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

/// Normalize a phone number to `+digits` / `digits`.
///
/// Spaces, dashes, dots and parentheses are dropped; a single leading `+` is
/// kept. Anything else is rejected, as are numbers outside 7..=15 digits.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let (plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut digits = String::with_capacity(rest.len() + 1);
    if plus {
        digits.push('+');
    }
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(Error::InvalidPhone(raw.to_string())),
        }
    }

    let count = digits.chars().filter(|c| c.is_ascii_digit()).count();
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&count) {
        return Err(Error::InvalidPhone(raw.to_string()));
    }
    Ok(digits)
}

/// A clinic-local calendar day expressed in UTC, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn previous(&self) -> DayWindow {
        DayWindow {
            start: self.start - Duration::days(1),
            end: self.start,
        }
    }
}

pub(crate) fn clinic_offset(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

/// The calendar day containing `now` for a clinic `utc_offset_minutes` east of UTC.
pub fn day_window(now: DateTime<Utc>, utc_offset_minutes: i32) -> DayWindow {
    let offset = clinic_offset(utc_offset_minutes);
    let local_midnight = now.with_timezone(&offset).date_naive().and_time(chrono::NaiveTime::MIN);
    // Fixed offsets have no gaps, so the local midnight always maps to one instant.
    let start = offset
        .from_local_datetime(&local_midnight)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    DayWindow {
        start,
        end: start + Duration::days(1),
    }
}

/// The clinic-local calendar day `date`, expressed in UTC.
pub fn date_window(date: NaiveDate, utc_offset_minutes: i32) -> DayWindow {
    let local_midnight = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
    day_window(
        local_midnight - Duration::minutes(utc_offset_minutes as i64),
        utc_offset_minutes,
    )
}

/// Find an active entry for the same (normalized) phone checked in during `window`.
///
/// `entries` must belong to a single clinic; phones are compared as stored,
/// which is the normalized form produced by [`normalize_phone`].
pub fn find_duplicate<'a>(
    entries: &'a [QueueEntry],
    phone: &str,
    window: DayWindow,
) -> Option<&'a QueueEntry> {
    entries
        .iter()
        .find(|e| e.is_active() && e.phone == phone && window.contains(e.checked_in_at))
}
