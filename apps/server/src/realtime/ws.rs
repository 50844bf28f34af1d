//! WebSocket endpoint
//!
//! One socket may join several rooms. Each joined room gets a forwarding
//! task that pushes serialized events into the connection's outbound
//! channel; the socket loop interleaves those with control replies.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use clinicq_core::Role;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::{sync::mpsc, task::JoinHandle};

use super::{
    events::{ClientMessage, ControlMessage, Room},
    hub::RealtimeHub,
};
use crate::{auth::Principal, metrics::WS_CONNECTIONS_OPEN, state::AppState, Error};

const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Access token; required only for clinic rooms.
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Response {
    let principal = match params.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => match state.tokens.verify(token) {
            Ok(principal) => Some(principal),
            Err(err) => {
                tracing::debug!(error = ?err, "Rejected WebSocket token");
                return Error::from(err).into_response();
            }
        },
        None => None,
    };

    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, principal))
}

async fn handle_socket(socket: WebSocket, hub: RealtimeHub, principal: Option<Principal>) {
    WS_CONNECTIONS_OPEN.inc();
    tracing::debug!(
        user_id = ?principal.as_ref().map(|p| p.user_id),
        "WebSocket connected"
    );

    let (mut ws_write, mut ws_read) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let mut session = Session::new(hub, principal, outbound_tx);

    loop {
        tokio::select! {
            incoming = ws_read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = session.handle_text(&text);
                        match serde_json::to_string(&reply) {
                            Ok(json) => {
                                if ws_write.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "Failed to serialize control frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
            Some(json) = outbound_rx.recv() => {
                if let Err(e) = ws_write.send(Message::Text(json)).await {
                    tracing::debug!(error = %e, "WebSocket write error");
                    break;
                }
            }
        }
    }

    session.close();
    WS_CONNECTIONS_OPEN.dec();
    tracing::debug!("WebSocket disconnected");
}

/// Per-connection room membership.
pub(crate) struct Session {
    hub: RealtimeHub,
    principal: Option<Principal>,
    outbound: mpsc::Sender<String>,
    forwarders: HashMap<Room, JoinHandle<()>>,
}

impl Session {
    pub(crate) fn new(
        hub: RealtimeHub,
        principal: Option<Principal>,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            hub,
            principal,
            outbound,
            forwarders: HashMap::new(),
        }
    }

    /// Apply one client frame and return the control reply.
    pub(crate) fn handle_text(&mut self, text: &str) -> ControlMessage {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                return ControlMessage::Error {
                    message: format!("invalid message: {e}"),
                }
            }
        };

        match message {
            ClientMessage::Ping => ControlMessage::Pong,
            ClientMessage::Subscribe { room } => match self.subscribe(&room) {
                Ok(()) => ControlMessage::Subscribed { room },
                Err(message) => ControlMessage::Error { message },
            },
            ClientMessage::Unsubscribe { room } => match room.parse::<Room>() {
                Ok(parsed) => {
                    if let Some(handle) = self.forwarders.remove(&parsed) {
                        handle.abort();
                    }
                    ControlMessage::Unsubscribed { room }
                }
                Err(message) => ControlMessage::Error { message },
            },
        }
    }

    fn subscribe(&mut self, raw: &str) -> Result<(), String> {
        let room: Room = raw.parse()?;
        authorize(self.principal.as_ref(), room)?;
        if self.forwarders.contains_key(&room) {
            return Ok(());
        }

        let mut subscription = self.hub.subscribe(room);
        let outbound = self.outbound.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let json = match serde_json::to_string(event.as_ref()) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize realtime event");
                        continue;
                    }
                };
                if outbound.send(json).await.is_err() {
                    break;
                }
            }
        });
        self.forwarders.insert(room, handle);
        Ok(())
    }

    pub(crate) fn rooms(&self) -> usize {
        self.forwarders.len()
    }

    pub(crate) fn close(&mut self) {
        for (_, handle) in self.forwarders.drain() {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Clinic rooms need a token for that clinic; a patient room's id is its own secret.
fn authorize(principal: Option<&Principal>, room: Room) -> Result<(), String> {
    match room {
        Room::Patient(_) => Ok(()),
        Room::Clinic(clinic_id) => match principal {
            Some(p) if p.role == Role::PlatformAdmin || p.clinic_id == Some(clinic_id) => Ok(()),
            Some(_) => Err(format!("not allowed to join {room}")),
            None => Err(format!("a token is required to join {room}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::EventKind;
    use serde_json::{json, Value};
    use std::time::Duration;
    use uuid::Uuid;

    fn staff(clinic_id: Uuid) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            clinic_id: Some(clinic_id),
            role: Role::Staff,
        }
    }

    fn reply(session: &mut Session, frame: Value) -> Value {
        serde_json::to_value(session.handle_text(&frame.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_clinic_room_requires_matching_token() {
        let hub = RealtimeHub::default();
        let clinic = Uuid::new_v4();
        let room = format!("clinic:{clinic}");
        let (tx, _rx) = mpsc::channel(8);

        let mut anonymous = Session::new(hub.clone(), None, tx.clone());
        let out = reply(&mut anonymous, json!({"action": "subscribe", "room": room}));
        assert_eq!(out["event"], "error");

        let mut other = Session::new(hub.clone(), Some(staff(Uuid::new_v4())), tx.clone());
        let out = reply(&mut other, json!({"action": "subscribe", "room": room}));
        assert_eq!(out["event"], "error");

        let mut own = Session::new(hub.clone(), Some(staff(clinic)), tx);
        let out = reply(&mut own, json!({"action": "subscribe", "room": room}));
        assert_eq!(out, json!({"event": "subscribed", "room": room}));
        assert_eq!(hub.subscriber_count(Room::Clinic(clinic)), 1);
    }

    #[tokio::test]
    async fn test_patient_room_forwards_events() {
        let hub = RealtimeHub::default();
        let entry = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = Session::new(hub.clone(), None, tx);

        let out = reply(
            &mut session,
            json!({"action": "subscribe", "room": format!("patient:{entry}")}),
        );
        assert_eq!(out["event"], "subscribed");

        hub.publish(Room::Patient(entry), EventKind::QueueEntry, json!({"position": 2}));
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["event"], "queue:entry");
        assert_eq!(frame["data"]["position"], 2);
    }

    #[tokio::test]
    async fn test_ping_unsubscribe_and_garbage() {
        let hub = RealtimeHub::default();
        let entry = Uuid::new_v4();
        let room = format!("patient:{entry}");
        let (tx, _rx) = mpsc::channel(8);
        let mut session = Session::new(hub.clone(), None, tx);

        assert_eq!(reply(&mut session, json!({"action": "ping"})), json!({"event": "pong"}));
        assert_eq!(reply(&mut session, json!({"hello": 1}))["event"], "error");
        assert_eq!(
            reply(&mut session, json!({"action": "subscribe", "room": "lobby:1"}))["event"],
            "error"
        );

        reply(&mut session, json!({"action": "subscribe", "room": room}));
        reply(&mut session, json!({"action": "subscribe", "room": room}));
        assert_eq!(session.rooms(), 1);

        let out = reply(&mut session, json!({"action": "unsubscribe", "room": room}));
        assert_eq!(out, json!({"event": "unsubscribed", "room": room}));
        assert_eq!(session.rooms(), 0);
    }
}
