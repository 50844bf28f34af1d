//! Room-scoped broadcast hub
//!
//! Each room owns a `tokio::sync::broadcast` channel that is created on the
//! first subscription and removed when the last [`Subscription`] is dropped.

use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use super::events::{EventKind, RealtimeEvent, Room};
use crate::metrics::{REALTIME_EVENTS_DROPPED, REALTIME_EVENTS_PUBLISHED, REALTIME_ROOMS};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct RealtimeHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    rooms: DashMap<Room, broadcast::Sender<Arc<RealtimeEvent>>>,
    capacity: usize,
    origin: Uuid,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                rooms: DashMap::new(),
                capacity: capacity.max(1),
                origin: Uuid::new_v4(),
            }),
        }
    }

    /// Identifies this process in queue changes shared with other processes.
    pub fn origin(&self) -> Uuid {
        self.inner.origin
    }

    pub fn subscribe(&self, room: Room) -> Subscription {
        let receiver = self
            .inner
            .rooms
            .entry(room)
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe();
        REALTIME_ROOMS.set(self.inner.rooms.len() as i64);

        Subscription {
            room,
            receiver: Some(receiver),
            hub: self.clone(),
        }
    }

    /// Send `data` to everyone in `room`.
    ///
    /// Returns the number of subscribers reached; 0 when the room is empty.
    pub fn publish(&self, room: Room, kind: EventKind, data: JsonValue) -> usize {
        let Some(sender) = self.inner.rooms.get(&room) else {
            return 0;
        };
        let delivered = sender
            .send(Arc::new(RealtimeEvent::new(kind, room, data)))
            .unwrap_or_default();
        if delivered > 0 {
            REALTIME_EVENTS_PUBLISHED
                .with_label_values(&[kind.as_str()])
                .inc();
        }
        delivered
    }

    pub fn room_count(&self) -> usize {
        self.inner.rooms.len()
    }

    pub fn subscriber_count(&self, room: Room) -> usize {
        self.inner
            .rooms
            .get(&room)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn release(&self, room: Room) {
        self.inner
            .rooms
            .remove_if(&room, |_, sender| sender.receiver_count() == 0);
        REALTIME_ROOMS.set(self.inner.rooms.len() as i64);
    }
}

/// A live membership in one room. Dropping it leaves the room.
pub struct Subscription {
    room: Room,
    receiver: Option<broadcast::Receiver<Arc<RealtimeEvent>>>,
    hub: RealtimeHub,
}

impl Subscription {
    pub fn room(&self) -> Room {
        self.room
    }

    /// Next event for this room, or `None` once the room is gone.
    ///
    /// A lagging receiver skips the events it missed and keeps going.
    pub async fn recv(&mut self) -> Option<Arc<RealtimeEvent>> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(room = %self.room, skipped, "Subscriber lagged");
                    REALTIME_EVENTS_DROPPED.inc_by(skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        self.hub.release(self.room);
    }
}
