//! WebSocket subscriptions against a live server

#[allow(unused)]
mod support;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::{net::SocketAddr, time::Duration};
use support::TestApp;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(app: &TestApp) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let router = app.router.clone();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    Ok(addr)
}

async fn send(socket: &mut Socket, frame: Value) -> anyhow::Result<()> {
    socket.send(Message::Text(frame.to_string())).await?;
    Ok(())
}

/// Next text frame whose `event` is `event`, skipping others.
async fn next_event(socket: &mut Socket, event: &str) -> anyhow::Result<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let frame = tokio::time::timeout_at(deadline, socket.next())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for {event}"))?
            .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
        if let Message::Text(text) = frame {
            let value: Value = serde_json::from_str(&text)?;
            if value["event"] == event {
                return Ok(value);
            }
        }
    }
}

#[tokio::test]
async fn staff_board_receives_queue_updates() -> anyhow::Result<()> {
    let app = TestApp::new();
    let tenant = app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;
    let addr = serve(&app).await?;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws?token={}", tenant.token)).await?;
    send(&mut socket, json!({ "action": "ping" })).await?;
    next_event(&mut socket, "pong").await?;

    let room = format!("clinic:{}", tenant.clinic_id);
    send(&mut socket, json!({ "action": "subscribe", "room": room })).await?;
    let subscribed = next_event(&mut socket, "subscribed").await?;
    assert_eq!(subscribed["room"], room);

    app.check_in(&tenant.token, "Ada", "+15550001111").await?;
    let update = next_event(&mut socket, "queue:updated").await?;
    assert_eq!(update["room"], room);
    assert_eq!(update["data"]["entries"][0]["patientName"], "Ada");
    assert_eq!(update["data"]["entries"][0]["position"], 1);
    Ok(())
}

#[tokio::test]
async fn patients_follow_their_own_entry_without_a_token() -> anyhow::Result<()> {
    let app = TestApp::new();
    let tenant = app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;
    let ada = app.check_in(&tenant.token, "Ada", "+15550001111").await?;
    let bob = app.check_in(&tenant.token, "Bob", "+15550002222").await?;
    let addr = serve(&app).await?;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await?;

    // Clinic rooms need staff credentials.
    send(
        &mut socket,
        json!({ "action": "subscribe", "room": format!("clinic:{}", tenant.clinic_id) }),
    )
    .await?;
    next_event(&mut socket, "error").await?;

    let room = format!("patient:{}", bob["id"].as_str().unwrap());
    send(&mut socket, json!({ "action": "subscribe", "room": room })).await?;
    next_event(&mut socket, "subscribed").await?;

    // Ada leaves; Bob moves up.
    let removed = app
        .delete(
            &format!("/api/queue/{}", ada["id"].as_str().unwrap()),
            Some(&tenant.token),
        )
        .await?;
    assert!(removed.status.is_success());

    let update = next_event(&mut socket, "queue:entry").await?;
    assert_eq!(update["data"]["position"], 1);
    assert_eq!(update["data"]["peopleAhead"], 0);
    Ok(())
}

#[tokio::test]
async fn removed_patient_sees_cancellation_without_position() -> anyhow::Result<()> {
    let app = TestApp::new();
    let tenant = app.register_clinic("Sunny Clinic", "owner@sunny.test").await?;
    app.check_in(&tenant.token, "Ada", "+15550001111").await?;
    let bob = app.check_in(&tenant.token, "Bob", "+15550002222").await?;
    let bob_id = bob["id"].as_str().unwrap().to_string();
    let addr = serve(&app).await?;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await?;
    let room = format!("patient:{bob_id}");
    send(&mut socket, json!({ "action": "subscribe", "room": room })).await?;
    next_event(&mut socket, "subscribed").await?;

    let removed = app
        .delete(&format!("/api/queue/{bob_id}"), Some(&tenant.token))
        .await?;
    assert!(removed.status.is_success());

    let update = next_event(&mut socket, "queue:entry").await?;
    assert_eq!(update["room"], room);
    assert_eq!(update["data"]["entryId"], bob_id);
    assert_eq!(update["data"]["status"], "CANCELLED");
    assert!(update["data"]["position"].is_null());
    Ok(())
}

#[tokio::test]
async fn invalid_token_is_refused_before_upgrade() -> anyhow::Result<()> {
    let app = TestApp::new();
    let addr = serve(&app).await?;

    let result = connect_async(format!("ws://{addr}/ws?token=garbage")).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP 401, got {other:?}"),
    }
    Ok(())
}
