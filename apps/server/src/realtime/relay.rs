//! Cross-process queue relay
//!
//! Queue mutations committed by another process (the standalone sweeper, a
//! second server replica) reach this process's rooms through the store's
//! change feed: LISTEN/NOTIFY on Postgres, an in-process channel in memory.
//! Changes carrying this process's own origin were already published locally
//! and are skipped.

use futures::StreamExt;
use tokio::{
    sync::watch,
    time::{sleep, Duration},
};

use crate::{db::DynStore, services::QueueService, workers::jittered_duration, Result};

const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);
const RECONNECT_JITTER: f64 = 0.2;

/// Forward foreign queue changes into `queue`'s hub until `shutdown` flips.
pub async fn run_relay(
    store: DynStore,
    queue: QueueService,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let origin = queue.origin();
    let mut reconnect_delay = RECONNECT_INITIAL;
    tracing::info!(backend = store.backend(), %origin, "Queue relay started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // The feed can drop with its connection; re-subscribe when it does.
        let mut changes = match store.queue_changes().await {
            Ok(stream) => {
                reconnect_delay = RECONNECT_INITIAL;
                stream
            }
            Err(e) => {
                let delay = jittered_duration(reconnect_delay, RECONNECT_JITTER);
                tracing::error!(error = %e, retry_in = ?delay, "Failed to subscribe to queue changes");
                reconnect_delay = (reconnect_delay * 2).min(RECONNECT_MAX);
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = sleep(delay) => {}
                }
                continue;
            }
        };

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Queue relay stopped");
                        return Ok(());
                    }
                }
                next = changes.next() => match next {
                    Some(Ok(change)) => {
                        if change.origin == origin {
                            continue;
                        }
                        if let Err(e) = queue.relay(&change).await {
                            tracing::warn!(
                                clinic_id = %change.clinic_id,
                                error = %e,
                                "Failed to relay queue change"
                            );
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Queue change feed error");
                    }
                    None => {
                        tracing::warn!("Queue change feed closed, resubscribing");
                        break;
                    }
                },
            }
        }
    }

    tracing::info!("Queue relay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{MemoryStore, Store},
        models::Clinic,
        realtime::{EventKind, RealtimeHub, Room},
        services::queue::{CheckInChannel, CheckInRequest},
    };
    use chrono::Utc;
    use clinicq_core::OrderingPolicy;
    use std::sync::Arc;
    use tokio::time::timeout;

    fn request(name: &str, phone: &str) -> CheckInRequest {
        CheckInRequest {
            name: name.to_string(),
            phone: phone.to_string(),
            reason: None,
            doctor_id: None,
            patient_id: None,
        }
    }

    #[tokio::test]
    async fn test_sweep_in_another_process_reaches_local_rooms() {
        let store = Arc::new(MemoryStore::new());
        let clinic = Clinic::new("Sunny", "sunny", Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_clinic(&clinic).await.unwrap();
        tx.commit().await.unwrap();

        let server_hub = RealtimeHub::default();
        let server = QueueService::new(store.clone(), server_hub.clone(), OrderingPolicy::Arrival, 15);
        let worker = QueueService::new(store.clone(), RealtimeHub::default(), OrderingPolicy::Arrival, 15);

        let ada = server
            .check_in(clinic.id, request("Ada", "+15550001111"), CheckInChannel::Staff)
            .await
            .unwrap()
            .entry;

        let mut board = server_hub.subscribe(Room::Clinic(clinic.id));
        let mut ticket = server_hub.subscribe(Room::Patient(ada.id));

        let (stop, stop_rx) = watch::channel(false);
        let relay = tokio::spawn(run_relay(store.clone(), server.clone(), stop_rx));
        // Let the relay subscribe before the worker commits.
        tokio::task::yield_now().await;
        sleep(Duration::from_millis(50)).await;

        let tomorrow = Utc::now() + chrono::Duration::days(1);
        assert_eq!(worker.sweep_stale(clinic.id, tomorrow).await.unwrap(), 1);

        let snapshot = timeout(Duration::from_secs(2), board.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.event, EventKind::QueueUpdated);
        assert!(snapshot.data["entries"].as_array().unwrap().is_empty());

        let entry = timeout(Duration::from_secs(2), ticket.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.event, EventKind::QueueEntry);
        assert_eq!(entry.data["status"], "NO_SHOW");
        assert!(entry.data["position"].is_null());

        stop.send(true).unwrap();
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_own_changes_are_not_published_twice() {
        let store = Arc::new(MemoryStore::new());
        let clinic = Clinic::new("Sunny", "sunny", Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_clinic(&clinic).await.unwrap();
        tx.commit().await.unwrap();

        let hub = RealtimeHub::default();
        let server = QueueService::new(store.clone(), hub.clone(), OrderingPolicy::Arrival, 15);
        let mut board = hub.subscribe(Room::Clinic(clinic.id));

        let (stop, stop_rx) = watch::channel(false);
        let relay = tokio::spawn(run_relay(store.clone(), server.clone(), stop_rx));
        sleep(Duration::from_millis(50)).await;

        server
            .check_in(clinic.id, request("Ada", "+15550001111"), CheckInChannel::Staff)
            .await
            .unwrap();

        let first = timeout(Duration::from_secs(2), board.recv()).await.unwrap();
        assert!(first.is_some());
        assert!(timeout(Duration::from_millis(200), board.recv()).await.is_err());

        stop.send(true).unwrap();
        relay.await.unwrap().unwrap();
    }
}
