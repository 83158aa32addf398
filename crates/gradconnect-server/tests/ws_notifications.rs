//! End-to-end tests for the notification WebSocket channel.

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use gradconnect_notify::{
    MentorshipRequestCreated, MentorshipStatus, MentorshipStatusChanged, Notification,
};
use gradconnect_server::{server, AppState, ServerConfig};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

/// Default timeout for test operations.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start the server on a random port.
async fn start_test_server() -> (SocketAddr, Arc<AppState>) {
    start_server_with(ServerConfig::test_local()).await
}

async fn start_server_with(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(AppState::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        server::serve(listener, server_state, std::future::pending())
            .await
            .unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr, user_id: &str) -> Client {
    let url = format!("ws://{}/api/ws/{}", addr, user_id);
    let (client, _) = timeout(DEFAULT_TIMEOUT, tokio_tungstenite::connect_async(&url))
        .await
        .expect("connect timed out")
        .expect("WebSocket handshake failed");
    client
}

/// Read the next JSON notification, skipping control frames.
async fn next_json(client: &mut Client) -> Value {
    loop {
        let msg = timeout(DEFAULT_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a notification")
            .expect("stream ended")
            .expect("receive error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Read notifications until one of the given kind arrives.
async fn next_of_kind(client: &mut Client, kind: &str) -> Value {
    loop {
        let json = next_json(client).await;
        if json["type"] == kind {
            return json;
        }
    }
}

/// Read frames until a close frame arrives and return its code and reason.
async fn next_close(client: &mut Client) -> (u16, String) {
    loop {
        let msg = timeout(DEFAULT_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended without close frame")
            .expect("receive error");
        if let Message::Close(frame) = msg {
            let frame = frame.expect("close frame without code");
            return (u16::from(frame.code), frame.reason.as_str().to_string());
        }
    }
}

async fn wait_for_count(state: &AppState, user_id: &Uuid, expected: usize) {
    timeout(DEFAULT_TIMEOUT, async {
        while state.registry.connection_count(user_id) != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {} connections, found {}",
            expected,
            state.registry.connection_count(user_id)
        )
    });
}

#[tokio::test]
async fn test_connect_receives_acknowledgement() {
    let (addr, state) = start_test_server().await;
    let user_id = Uuid::new_v4();

    let mut client = connect(addr, &user_id.to_string()).await;
    let ack = next_json(&mut client).await;

    assert_eq!(ack["type"], "connection");
    assert_eq!(ack["connections"], 1);
    assert_eq!(
        ack["message"],
        format!("Welcome! You are connected as user {}", user_id)
    );
    assert_eq!(state.registry.connection_count(&user_id), 1);
}

#[tokio::test]
async fn test_text_frames_are_echoed() {
    let (addr, _state) = start_test_server().await;
    let user_id = Uuid::new_v4();

    let mut client = connect(addr, &user_id.to_string()).await;
    next_of_kind(&mut client, "connection").await;

    client.send(Message::Text("hello".into())).await.unwrap();
    let echo = next_of_kind(&mut client, "echo").await;

    assert_eq!(echo["message"], "You sent: hello");
    assert_eq!(echo["user_id"], user_id.to_string());
}

#[tokio::test]
async fn test_invalid_user_id_is_closed_with_1003() {
    let (addr, state) = start_test_server().await;

    let mut client = connect(addr, "not-a-uuid").await;
    let (code, reason) = next_close(&mut client).await;

    assert_eq!(code, 1003);
    assert_eq!(reason, "Invalid user ID format");
    assert_eq!(state.registry.total_connections(), 0);
}

#[tokio::test]
async fn test_mentorship_request_reaches_every_alumni_connection() {
    let (addr, state) = start_test_server().await;
    let alumni_id = Uuid::new_v4();
    let student_id = Uuid::new_v4();

    let mut laptop = connect(addr, &alumni_id.to_string()).await;
    let mut phone = connect(addr, &alumni_id.to_string()).await;
    let mut student = connect(addr, &student_id.to_string()).await;
    wait_for_count(&state, &alumni_id, 2).await;
    wait_for_count(&state, &student_id, 1).await;

    let request_id = Uuid::new_v4();
    let notification: Notification = MentorshipRequestCreated {
        request_id,
        student_id,
        student_name: "Ada Student".to_string(),
        message: "Would you mentor me?".to_string(),
        created_at: Utc::now(),
    }
    .into();
    let report = state.registry.send_to_user(&alumni_id, &notification).await;
    assert_eq!(report.delivered, 2);

    for client in [&mut laptop, &mut phone] {
        let received = next_of_kind(client, "mentorship_request").await;
        assert_eq!(received["data"]["request_id"], request_id.to_string());
        assert_eq!(received["data"]["student_id"], student_id.to_string());
        assert_eq!(received["data"]["student_name"], "Ada Student");
    }

    // The student only hears about the answer
    let answer: Notification = MentorshipStatusChanged {
        request_id,
        status: MentorshipStatus::Accepted,
        alumni_name: "Grace Alumni".to_string(),
        updated_at: Utc::now(),
    }
    .into();
    state.registry.send_to_user(&student_id, &answer).await;

    let received = next_of_kind(&mut student, "mentorship_response").await;
    assert_eq!(received["data"]["status"], "accepted");
    assert_eq!(received["data"]["alumni_name"], "Grace Alumni");
}

#[tokio::test]
async fn test_broadcast_reaches_every_user() {
    let (addr, state) = start_test_server().await;
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let mut client_a = connect(addr, &a.to_string()).await;
    let mut client_b = connect(addr, &b.to_string()).await;
    wait_for_count(&state, &a, 1).await;
    wait_for_count(&state, &b, 1).await;

    let report = state
        .registry
        .broadcast(&Notification::announcement("maintenance tonight"))
        .await;
    assert_eq!(report.delivered, 2);

    for client in [&mut client_a, &mut client_b] {
        let received = next_of_kind(client, "announcement").await;
        assert_eq!(received["message"], "maintenance tonight");
    }
    assert_eq!(state.registry.connection_count(&a), 1);
    assert_eq!(state.registry.connection_count(&b), 1);
}

#[tokio::test]
async fn test_client_disconnect_unregisters() {
    let (addr, state) = start_test_server().await;
    let user_id = Uuid::new_v4();

    let mut first = connect(addr, &user_id.to_string()).await;
    let mut second = connect(addr, &user_id.to_string()).await;
    wait_for_count(&state, &user_id, 2).await;

    first.close(None).await.unwrap();
    wait_for_count(&state, &user_id, 1).await;

    // The remaining connection still gets notifications
    state
        .registry
        .send_to_user(&user_id, &Notification::new("x"))
        .await;
    next_of_kind(&mut second, "x").await;

    drop(second);
    wait_for_count(&state, &user_id, 0).await;
    assert!(!state.registry.is_online(&user_id));
}

#[tokio::test]
async fn test_shutdown_closes_sockets_with_going_away() {
    let (addr, state) = start_test_server().await;
    let user_id = Uuid::new_v4();

    let mut client = connect(addr, &user_id.to_string()).await;
    next_of_kind(&mut client, "connection").await;

    state.begin_shutdown();

    let (code, _) = next_close(&mut client).await;
    assert_eq!(code, 1001);
    assert_eq!(state.registry.total_connections(), 0);
}

#[tokio::test]
async fn test_evicted_connection_is_closed_with_policy_violation() {
    let (addr, state) = start_test_server().await;
    let user_id = Uuid::new_v4();

    let mut client = connect(addr, &user_id.to_string()).await;
    next_of_kind(&mut client, "connection").await;

    // Removing the connection without a shutdown is what a failed delivery does
    assert_eq!(state.registry.drain(), 1);

    let (code, reason) = next_close(&mut client).await;
    assert_eq!(code, 1008);
    assert_eq!(reason, "Notification delivery failed");
}

#[tokio::test]
async fn test_out_of_range_ping_interval_keeps_socket_alive() {
    let config = ServerConfig {
        ping_interval: Some(Duration::MAX),
        ..ServerConfig::test_local()
    };
    let (addr, state) = start_server_with(config).await;
    let user_id = Uuid::new_v4();

    let mut client = connect(addr, &user_id.to_string()).await;
    let ack = next_json(&mut client).await;
    assert_eq!(ack["type"], "connection");

    client.send(Message::Text("still here".into())).await.unwrap();
    let echo = next_of_kind(&mut client, "echo").await;
    assert_eq!(echo["message"], "You sent: still here");
    assert_eq!(state.registry.connection_count(&user_id), 1);
}
