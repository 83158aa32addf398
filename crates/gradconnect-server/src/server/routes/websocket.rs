//! Real-time notification channel over WebSocket.
//!
//! Clients connect to `/api/ws/:user_id` and receive JSON text frames. Each
//! accepted socket is split into a reader loop (this task) and a writer task
//! that drains the connection's [`ChannelSink`]; the registry only ever talks
//! to the sink.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use gradconnect_notify::{ChannelSink, Notification, OutboundNotification, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::AppState;

/// How long the writer gets to flush and send its close frame once the
/// connection has been unregistered.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ws/:user_id", get(notifications_websocket_handler))
        .with_state(state)
}

/// GET /api/ws/:user_id
///
/// Upgrades to a WebSocket. A user id that is not a UUID is closed right
/// after the upgrade with close code 1003 and never reaches the registry.
async fn notifications_websocket_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match Uuid::parse_str(&user_id) {
        Ok(user_id) => {
            info!(user_id = %user_id, "Notification WebSocket connection request");
            ws.on_upgrade(move |socket| handle_notification_socket(socket, state, user_id))
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Rejecting WebSocket with invalid user id");
            ws.on_upgrade(reject_socket)
        }
    }
}

async fn reject_socket(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::UNSUPPORTED,
        reason: "Invalid user ID format".into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Failed to send close frame to rejected socket");
    }
}

/// Handle an accepted notification socket until either side closes it.
async fn handle_notification_socket(socket: WebSocket, state: Arc<AppState>, user_id: UserId) {
    let (sender, mut receiver) = socket.split();
    let (sink, outbound) = ChannelSink::new(state.config.outbound_buffer);

    let registration = state.registry.register_scoped(user_id, Arc::new(sink));
    let connection_id = registration.connection_id();
    info!(
        user_id = %user_id,
        connection_id = %connection_id,
        "Notification WebSocket connection established"
    );

    // Cancelled once this task stops reading, so the writer can tell a
    // client-side close from an eviction by the registry
    let closing = CancellationToken::new();
    let mut writer = tokio::spawn(writer_task(
        sender,
        outbound,
        state.config.ping_interval,
        state.shutdown.clone(),
        closing.clone(),
    ));

    let ack = Notification::connection_ack(user_id, state.registry.connection_count(&user_id));
    state.registry.send_to_user(&user_id, &ack).await;

    let mut writer_finished = false;
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                info!(user_id = %user_id, "Server shutting down, closing notification socket");
                break;
            }
            _ = &mut writer => {
                debug!(user_id = %user_id, "Writer task finished");
                writer_finished = true;
                break;
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    debug!(user_id = %user_id, len = text.len(), "Received text frame");
                    let echo = Notification::echo(user_id, &text);
                    state.registry.send_to_user(&user_id, &echo).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(user_id = %user_id, "Received binary frame (not supported)");
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are answered by the WebSocket layer
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(user_id = %user_id, reason = ?frame, "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    warn!(user_id = %user_id, error = %e, "WebSocket receive error");
                    break;
                }
                None => {
                    debug!(user_id = %user_id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    // Unregistering drops the last sender, which lets the writer finish
    closing.cancel();
    drop(registration);

    if !writer_finished && timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        debug!(user_id = %user_id, "Writer did not finish in time, aborting");
        writer.abort();
    }

    info!(
        user_id = %user_id,
        connection_id = %connection_id,
        remaining = state.registry.connection_count(&user_id),
        "Notification WebSocket connection closed"
    );
}

/// Forward queued notifications to the socket, pinging while idle.
///
/// Ends when every sender is gone (connection unregistered) or a write
/// fails. Returning drops the receiver, so later deliveries to this
/// connection fail and prune it.
///
/// The close frame says why the channel ended: 1001 on server shutdown,
/// 1000 after the client went away, 1008 when the registry evicted the
/// connection for a failed delivery.
async fn writer_task(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundNotification>,
    ping_interval: Option<Duration>,
    shutdown: CancellationToken,
    closing: CancellationToken,
) {
    let mut ticker = ping_interval.and_then(|period| {
        let Some(start) = Instant::now().checked_add(period) else {
            warn!(?period, "Ping interval out of range, keepalive pings disabled");
            return None;
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(ticker)
    });

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(notification) => {
                    let frame = Message::Text(notification.as_str().to_string());
                    if let Err(e) = sender.send(frame).await {
                        debug!(error = %e, kind = notification.kind(), "Failed to write notification");
                        return;
                    }
                }
                None => break,
            },
            _ = next_tick(&mut ticker) => {
                if let Err(e) = sender.send(Message::Ping(Vec::new())).await {
                    debug!(error = %e, "Failed to send keepalive ping");
                    return;
                }
            }
        }
    }

    let frame = if shutdown.is_cancelled() {
        CloseFrame {
            code: close_code::AWAY,
            reason: "Server shutting down".into(),
        }
    } else if closing.is_cancelled() {
        CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        }
    } else {
        debug!("Connection evicted by the registry");
        CloseFrame {
            code: close_code::POLICY,
            reason: "Notification delivery failed".into(),
        }
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
