//! Usage telemetry events for console query execution.
//!
//! One event is emitted per console query outcome. Emission is best-effort:
//! a failure to record an event must never affect the query response, so the
//! client trait is infallible and implementations swallow their own errors.

use tracing::info;

pub const EVENT_QUERY_EXECUTED: &str = "query_console_executed";
pub const EVENT_QUERY_WARNED: &str = "query_console_warned";
pub const EVENT_QUERY_BLOCKED: &str = "query_console_blocked";
pub const EVENT_QUERY_FAILED: &str = "query_console_failed";

/// A single usage telemetry event.
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    pub name: &'static str,
    pub instance_id: String,
    pub connector: String,
    /// Estimated bytes scanned; 0 when the backend could not estimate.
    pub bytes_scanned: i64,
    pub execution_time_ms: i64,
}

/// Sink for usage telemetry events.
pub trait ActivityClient: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

/// Emits events as structured log lines and bumps the query counters.
pub struct LoggingActivityClient;

impl ActivityClient for LoggingActivityClient {
    fn record(&self, event: ActivityEvent) {
        info!(
            target: "meridian::activity",
            event = event.name,
            instance_id = %event.instance_id,
            connector = %event.connector,
            bytes_scanned = event.bytes_scanned,
            execution_time_ms = event.execution_time_ms,
            "console query event"
        );
    }
}

/// Discards all events.
#[allow(dead_code)]
pub struct NoopActivityClient;

impl ActivityClient for NoopActivityClient {
    fn record(&self, _event: ActivityEvent) {}
}
