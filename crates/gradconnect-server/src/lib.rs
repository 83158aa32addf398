//! GradConnect notification server.
//!
//! Hosts the WebSocket channel clients use to receive real-time
//! notifications, plus health and presence reporting. Request handlers
//! reach connected users through [`server::AppState::registry`].

pub mod config;
pub mod server;
pub mod telemetry;

pub use config::{ConfigError, ServerConfig};
pub use server::AppState;
