//! Realtime rooms and event payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A broadcast scope: a clinic's staff board or a single patient's ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Clinic(Uuid),
    Patient(Uuid),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Clinic(id) => write!(f, "clinic:{id}"),
            Room::Patient(id) => write!(f, "patient:{id}"),
        }
    }
}

impl FromStr for Room {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid room '{s}'"))?;
        let id = Uuid::parse_str(id).map_err(|_| format!("invalid room id in '{s}'"))?;
        match kind {
            "clinic" => Ok(Room::Clinic(id)),
            "patient" => Ok(Room::Patient(id)),
            _ => Err(format!("unknown room kind '{kind}'")),
        }
    }
}

impl Serialize for Room {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    QueueUpdated,
    QueueEntry,
    AppointmentCreated,
    AppointmentUpdated,
    AppointmentCancelled,
    DoctorPresence,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::QueueUpdated => "queue:updated",
            EventKind::QueueEntry => "queue:entry",
            EventKind::AppointmentCreated => "appointment:created",
            EventKind::AppointmentUpdated => "appointment:updated",
            EventKind::AppointmentCancelled => "appointment:cancelled",
            EventKind::DoctorPresence => "doctor:presence",
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A domain event as delivered to WebSocket subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub event: EventKind,
    pub room: Room,
    pub data: JsonValue,
    pub at: DateTime<Utc>,
}

impl RealtimeEvent {
    pub fn new(event: EventKind, room: Room, data: JsonValue) -> Self {
        Self {
            event,
            room,
            data,
            at: Utc::now(),
        }
    }
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { room: String },
    Unsubscribe { room: String },
    Ping,
}

/// Control frames sent by the server; domain events are sent as [`RealtimeEvent`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ControlMessage {
    Subscribed { room: String },
    Unsubscribed { room: String },
    Error { message: String },
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_room_round_trip() {
        let id = Uuid::new_v4();
        let room: Room = format!("clinic:{id}").parse().unwrap();
        assert_eq!(room, Room::Clinic(id));
        assert_eq!(Room::Patient(id).to_string(), format!("patient:{id}"));
        assert!("lobby:abc".parse::<Room>().is_err());
        assert!("clinic:not-a-uuid".parse::<Room>().is_err());
    }

    #[test]
    fn test_wire_formats() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"action": "subscribe", "room": "clinic:x"})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                room: "clinic:x".to_string()
            }
        );
        let ping: ClientMessage = serde_json::from_value(json!({"action": "ping"})).unwrap();
        assert_eq!(ping, ClientMessage::Ping);

        let pong = serde_json::to_value(ControlMessage::Pong).unwrap();
        assert_eq!(pong, json!({"event": "pong"}));

        let id = Uuid::new_v4();
        let event = RealtimeEvent::new(EventKind::QueueUpdated, Room::Clinic(id), json!([]));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "queue:updated");
        assert_eq!(value["room"], format!("clinic:{id}"));
        assert!(value["at"].is_string());
    }
}
