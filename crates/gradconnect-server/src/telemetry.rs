//! Logging setup for the GradConnect server.
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Log filter (default: `info,gradconnect_server=debug,gradconnect_notify=debug`)
//! - `GRADCONNECT_LOG_FORMAT`: `json` for structured output, anything else for human-readable

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,gradconnect_server=debug,gradconnect_notify=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize human-readable console logging.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Telemetry initialized");

    Ok(())
}

/// Initialize JSON logging for log aggregation in deployed environments.
pub fn init_json() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Telemetry initialized (json)");

    Ok(())
}

/// Flush telemetry before exit.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
