//! Error types for notification delivery.

use std::time::Duration;

use thiserror::Error;

/// Failure to hand a notification to one connection.
///
/// Every variant is treated the same way by the registry: the connection is
/// considered gone and is pruned. The distinction only matters for logging.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The receiving side of the connection has gone away
    #[error("connection channel closed")]
    ChannelClosed,

    /// The connection did not accept the notification in time
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The payload could not be encoded
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transport-specific write failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl DeliveryError {
    /// Create a new transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Short label used as a metrics attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::ChannelClosed => "closed",
            DeliveryError::Timeout(_) => "timeout",
            DeliveryError::Encode(_) => "encode",
            DeliveryError::Transport(_) => "transport",
        }
    }
}
