//! Wait-time statistics for a clinic's day

use crate::{checkin::DayWindow, entry::QueueEntry, status::QueueStatus};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitStats {
    pub waiting: usize,
    pub notified: usize,
    pub in_consultation: usize,
    pub completed_today: usize,
    pub cancelled_today: usize,
    pub no_show_today: usize,
    pub average_wait_minutes: Option<f64>,
    pub average_consultation_minutes: Option<f64>,
}

impl WaitStats {
    /// Summarize the entries of one clinic.
    ///
    /// Active entries are counted whatever their check-in day; terminal
    /// counts and averages only use entries checked in during `day`.
    pub fn compute(entries: &[QueueEntry], day: DayWindow) -> Self {
        let mut stats = WaitStats::default();
        let mut waits = Vec::new();
        let mut consultations = Vec::new();

        for entry in entries {
            match entry.status {
                QueueStatus::Waiting => stats.waiting += 1,
                QueueStatus::Notified => stats.notified += 1,
                QueueStatus::InConsultation => stats.in_consultation += 1,
                _ => {}
            }

            if !day.contains(entry.checked_in_at) {
                continue;
            }
            match entry.status {
                QueueStatus::Completed => stats.completed_today += 1,
                QueueStatus::Cancelled => stats.cancelled_today += 1,
                QueueStatus::NoShow => stats.no_show_today += 1,
                _ => {}
            }
            if let Some(wait) = entry.wait_minutes() {
                waits.push(wait);
            }
            if let Some(minutes) = entry.consultation_minutes() {
                consultations.push(minutes);
            }
        }

        stats.average_wait_minutes = mean(&waits);
        stats.average_consultation_minutes = mean(&consultations);
        stats
    }

    pub fn active(&self) -> usize {
        self.waiting + self.notified + self.in_consultation
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    Some((avg * 10.0).round() / 10.0)
}

/// Estimated minutes until an entry at `position` is called.
///
/// Uses the observed average consultation time when available, otherwise
/// the clinic's configured `fallback_minutes`.
pub fn estimated_wait_minutes(
    position: i32,
    average_consultation: Option<f64>,
    fallback_minutes: i32,
) -> i64 {
    if position <= 1 {
        return 0;
    }
    let per_patient = average_consultation
        .filter(|avg| *avg > 0.0)
        .unwrap_or(fallback_minutes.max(0) as f64);
    ((position - 1) as f64 * per_patient).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkin::day_window;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn counts_and_averages() {
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap();
        let day = day_window(now, 0);
        let clinic = Uuid::new_v4();

        let mut done = QueueEntry::new_waiting(clinic, "a", "+15550000001", now - Duration::minutes(60));
        done.called_at = Some(now - Duration::minutes(40));
        done.close(QueueStatus::Completed, now - Duration::minutes(30));

        let mut current = QueueEntry::new_waiting(clinic, "b", "+15550000002", now - Duration::minutes(50));
        current.status = QueueStatus::InConsultation;
        current.called_at = Some(now - Duration::minutes(20));

        let mut gone = QueueEntry::new_waiting(clinic, "c", "+15550000003", now - Duration::minutes(10));
        gone.close(QueueStatus::NoShow, now);

        let waiting = QueueEntry::new_waiting(clinic, "d", "+15550000004", now);
        let mut stale = QueueEntry::new_waiting(clinic, "e", "+15550000005", now - Duration::days(2));
        stale.close(QueueStatus::Completed, now - Duration::days(2));

        let stats = WaitStats::compute(&[done, current, gone, waiting, stale], day);
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.in_consultation, 1);
        assert_eq!(stats.completed_today, 1);
        assert_eq!(stats.no_show_today, 1);
        assert_eq!(stats.active(), 2);
        // Waits: 20 and 30 minutes.
        assert_eq!(stats.average_wait_minutes, Some(25.0));
        assert_eq!(stats.average_consultation_minutes, Some(10.0));
    }

    #[test]
    fn empty_day_has_no_averages() {
        let now = Utc::now();
        let stats = WaitStats::compute(&[], day_window(now, 0));
        assert_eq!(stats, WaitStats::default());
    }

    #[test]
    fn estimate_uses_average_then_fallback() {
        assert_eq!(estimated_wait_minutes(1, Some(12.0), 15), 0);
        assert_eq!(estimated_wait_minutes(3, Some(12.0), 15), 24);
        assert_eq!(estimated_wait_minutes(3, None, 15), 30);
        assert_eq!(estimated_wait_minutes(4, Some(0.0), 10), 30);
    }
}
