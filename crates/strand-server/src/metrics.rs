//! Metrics collection and export.
//!
//! Uses the `metrics` crate for instrumentation and exports to Prometheus
//! format on a side port.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "strand_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "strand_connections_active";
    pub const MUTATIONS_TOTAL: &str = "strand_mutations_total";
    pub const EVENTS_PUBLISHED_TOTAL: &str = "strand_events_published_total";
    pub const ROOMS_ACTIVE: &str = "strand_rooms_active";
    pub const SUBSCRIPTIONS_TOTAL: &str = "strand_subscriptions_total";
    pub const FRAME_LATENCY_SECONDS: &str = "strand_frame_latency_seconds";
    pub const ERRORS_TOTAL: &str = "strand_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of WebSocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active WebSocket connections"
    );
    metrics::describe_counter!(
        names::MUTATIONS_TOTAL,
        "Total number of committed mutations"
    );
    metrics::describe_counter!(
        names::EVENTS_PUBLISHED_TOTAL,
        "Total number of events published to rooms"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of live rooms");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of room subscriptions"
    );
    metrics::describe_histogram!(
        names::FRAME_LATENCY_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a committed mutation.
pub fn record_mutation(kind: &str) {
    counter!(names::MUTATIONS_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Record a published event and its delivery count.
pub fn record_event(kind: &str) {
    counter!(names::EVENTS_PUBLISHED_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Record a room subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Update the live room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record inbound frame latency.
pub fn record_frame_latency(seconds: f64) {
    histogram!(names::FRAME_LATENCY_SECONDS).record(seconds);
}

/// Record an error by taxonomy code.
pub fn record_error(code: &str) {
    counter!(names::ERRORS_TOTAL, "code" => code.to_string()).increment(1);
}

/// Guard that records a connection on creation and the matching
/// disconnection on drop.
pub struct ConnectionGuard;

impl ConnectionGuard {
    /// Create a new guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_guard() {
        // Recording without an installed exporter is a no-op and must not
        // panic.
        let _guard = ConnectionGuard::new();
        record_mutation("queue_add");
        record_error("InvalidInput");
    }
}
