//! Connection Registry for real-time notification delivery.
//!
//! Tracks which users currently hold live connections and pushes
//! notifications to them, best-effort.
//!
//! ## Architecture
//!
//! Each socket task registers a sink when its connection is accepted and
//! keeps the returned [`Registration`] alive for as long as the socket is
//! open. Request handlers address users by id; the registry fans the payload
//! out to every connection the user holds.
//!
//! ```text
//! request handler ──send_to_user──> ConnectionRegistry ──deliver──> ChannelSink ──> writer task ──> socket
//!                                   DashMap<UserId,                 (one per connection)
//!                                     Vec<Arc<Connection>>>
//! ```
//!
//! A delivery that fails or exceeds the send timeout removes that connection.

mod connection_registry;

pub use connection_registry::{ConnectionRegistry, DeliveryReport, Registration, RegistryConfig};
