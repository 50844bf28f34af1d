//! End-of-day sweeper
//!
//! Queues are per clinic-local day: entries left active from an earlier day
//! are closed as NO_SHOW, and appointments still open `appointment_grace_minutes`
//! after they ended become NO_SHOW as well.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::base::Worker;
use crate::{
    db::DynStore,
    metrics::SWEEPER_CLOSED_TOTAL,
    services::{AppointmentService, QueueService},
    state::AppState,
    Result,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub queue_entries: usize,
    pub appointments: usize,
    /// Clinics whose queue could not be swept this pass.
    pub failed_clinics: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    store: DynStore,
    queue: QueueService,
    appointments: AppointmentService,
    grace: Duration,
}

impl Sweeper {
    pub fn new(
        store: DynStore,
        queue: QueueService,
        appointments: AppointmentService,
        grace_minutes: i64,
    ) -> Self {
        Self {
            store,
            queue,
            appointments,
            grace: Duration::minutes(grace_minutes.max(0)),
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.store.clone(),
            state.queue.clone(),
            state.appointments.clone(),
            state.config.workers.appointment_grace_minutes,
        )
    }

    /// One pass as of `now`. A clinic that fails is logged and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for clinic_id in self.store.clinics_with_active_entries().await? {
            match self.queue.sweep_stale(clinic_id, now).await {
                Ok(closed) => report.queue_entries += closed,
                Err(e) => {
                    report.failed_clinics += 1;
                    tracing::warn!(clinic_id = %clinic_id, error = %e, "Queue sweep failed");
                }
            }
        }
        report.appointments = self.appointments.close_overdue(now - self.grace).await?;

        SWEEPER_CLOSED_TOTAL
            .with_label_values(&["queue_entry"])
            .inc_by(report.queue_entries as u64);
        SWEEPER_CLOSED_TOTAL
            .with_label_values(&["appointment"])
            .inc_by(report.appointments as u64);

        if report.queue_entries > 0 || report.appointments > 0 {
            tracing::info!(
                queue_entries = report.queue_entries,
                appointments = report.appointments,
                "Sweeper closed stale records"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl Worker for Sweeper {
    fn name(&self) -> &str {
        "sweeper"
    }

    async fn run_once(&self) -> Result<()> {
        let report = self.sweep(Utc::now()).await?;
        if report.failed_clinics > 0 {
            tracing::warn!(failed = report.failed_clinics, "Sweeper skipped clinics");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{MemoryStore, Store},
        models::Clinic,
        realtime::RealtimeHub,
        services::queue::{CheckInChannel, CheckInRequest},
    };
    use clinicq_core::OrderingPolicy;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweep_closes_yesterdays_queue() {
        let store = Arc::new(MemoryStore::new());
        let clinic = Clinic::new("Sunny", "sunny", Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_clinic(&clinic).await.unwrap();
        tx.commit().await.unwrap();

        let hub = RealtimeHub::default();
        let queue = QueueService::new(store.clone(), hub.clone(), OrderingPolicy::Arrival, 15);
        let appointments = AppointmentService::new(store.clone(), hub);
        let sweeper = Sweeper::new(store.clone(), queue.clone(), appointments, 30);

        queue
            .check_in(
                clinic.id,
                CheckInRequest {
                    name: "Ada".to_string(),
                    phone: "+15550001111".to_string(),
                    reason: None,
                    doctor_id: None,
                    patient_id: None,
                },
                CheckInChannel::Staff,
            )
            .await
            .unwrap();

        // Same day: nothing to do.
        let report = sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.queue_entries, 0);

        let report = sweeper.sweep(Utc::now() + Duration::days(1)).await.unwrap();
        assert_eq!(report.queue_entries, 1);
        assert_eq!(report.failed_clinics, 0);
        assert!(store.active_entries(clinic.id).await.unwrap().is_empty());
        assert!(store.clinics_with_active_entries().await.unwrap().is_empty());
    }
}
