//! Notification delivery metrics.
//!
//! Uses the global OpenTelemetry meter provider, which must be installed by
//! the host application. Without one every instrument is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("gradconnect-notify"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for notifications accepted by a connection sink.
pub fn notifications_delivered() -> Counter<u64> {
    meter()
        .u64_counter("notify.deliveries.succeeded")
        .with_description("Notifications handed to a connection")
        .with_unit("notification")
        .build()
}

/// Counter for failed deliveries (each one prunes a connection).
pub fn notifications_failed() -> Counter<u64> {
    meter()
        .u64_counter("notify.deliveries.failed")
        .with_description("Notification deliveries that failed or timed out")
        .with_unit("notification")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for live registered connections.
pub fn connections_active() -> Gauge<i64> {
    meter()
        .i64_gauge("notify.connections.active")
        .with_description("Current number of registered notification connections")
        .with_unit("connection")
        .build()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a delivery outcome.
pub fn record_delivery(kind: &str, outcome: Result<(), &'static str>) {
    match outcome {
        Ok(()) => notifications_delivered().add(1, &[KeyValue::new("kind", kind.to_string())]),
        Err(reason) => notifications_failed().add(
            1,
            &[
                KeyValue::new("kind", kind.to_string()),
                KeyValue::new("reason", reason),
            ],
        ),
    }
}

/// Record the current number of live connections.
pub fn record_connections(count: usize) {
    connections_active().record(count as i64, &[]);
}
