//! # gradconnect-notify
//!
//! Presence tracking and best-effort notification delivery for GradConnect.
//!
//! ## Architecture
//!
//! - **Registry**: maps each user id to the live connections that user holds
//!   (one per browser tab or device).
//! - **Sinks**: every connection is reached through a [`NotificationSink`];
//!   the server uses [`ChannelSink`], which feeds the socket's writer task.
//! - **Notifications**: JSON documents with a `type` discriminator, encoded
//!   once per send and shared between all recipients.
//!
//! Delivery is fire-and-forget. A connection whose delivery fails or times
//! out is removed from the registry; nothing is queued or retried.

pub mod connection;
pub mod metrics;
pub mod notification;
pub mod registry;

mod error;

pub use connection::{ChannelSink, Connection, ConnectionId, NotificationSink};
pub use error::DeliveryError;
pub use notification::{
    MentorshipRequestCreated, MentorshipStatus, MentorshipStatusChanged, Notification,
    OutboundNotification,
};
pub use registry::{ConnectionRegistry, DeliveryReport, Registration, RegistryConfig};

/// Identifier of a GradConnect user.
pub type UserId = uuid::Uuid;
