//! Connections and the sinks notifications are delivered through.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DeliveryError;
use crate::notification::OutboundNotification;
use crate::UserId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Destination for notifications addressed to one connection.
///
/// Implementations report any failure as an error; they should not retry.
/// The registry applies its own deadline around every call.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    /// Hand one encoded notification to the connection.
    async fn deliver(&self, notification: &OutboundNotification) -> Result<(), DeliveryError>;
}

/// A live connection owned by the registry.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    sink: Arc<dyn NotificationSink>,
}

impl Connection {
    pub fn new(user_id: UserId, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            id: ConnectionId::next(),
            user_id,
            sink,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub(crate) async fn deliver(
        &self,
        notification: &OutboundNotification,
    ) -> Result<(), DeliveryError> {
        self.sink.deliver(notification).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Sink backed by a bounded channel drained by the socket's writer task.
///
/// When the writer task stops (socket closed or write error) the receiver is
/// dropped and every later delivery fails with [`DeliveryError::ChannelClosed`].
/// A full channel makes `deliver` wait for room.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<OutboundNotification>,
}

impl ChannelSink {
    /// Create a sink and the receiver its writer task should drain.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundNotification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn deliver(&self, notification: &OutboundNotification) -> Result<(), DeliveryError> {
        self.sender
            .send(notification.clone())
            .await
            .map_err(|_| DeliveryError::ChannelClosed)
    }
}
