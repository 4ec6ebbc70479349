//! Prometheus metrics for the Meridian Gateway
//!
//! Exports metrics for:
//! - Query execution across surfaces (batch, console, pgwire)
//! - Batch entry outcomes
//! - Guardrail admission decisions
//! - Active client connections and engine leases

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, register_int_gauge_vec,
    Counter, CounterVec, Encoder, HistogramVec, IntGaugeVec, TextEncoder,
};

/// Queries processed, by surface and status
pub static QUERIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "meridian_queries_total",
        "Total queries processed by surface and status",
        &["surface", "status"]
    )
    .unwrap()
});

/// Query execution latency by surface
pub static QUERY_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "meridian_query_duration_seconds",
        "Query execution duration in seconds",
        &["surface"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap()
});

/// Batch sub-query outcomes
pub static BATCH_ENTRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "meridian_batch_entries_total",
        "Batch sub-query results by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Guardrail admission decisions
pub static ADMISSION_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "meridian_admission_decisions_total",
        "Guardrail admission decisions for console queries",
        &["decision"]
    )
    .unwrap()
});

/// Estimated bytes scanned across admitted queries
pub static DATA_SCANNED_BYTES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "meridian_data_scanned_bytes_total",
        "Total estimated bytes scanned by admitted queries"
    )
    .unwrap()
});

/// Active client connections by protocol
pub static ACTIVE_CONNECTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "meridian_active_connections",
        "Number of active client connections",
        &["protocol"]
    )
    .unwrap()
});

/// Outstanding OLAP engine leases by connector
pub static ACTIVE_ENGINE_LEASES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "meridian_active_engine_leases",
        "Outstanding OLAP engine leases by connector",
        &["connector"]
    )
    .unwrap()
});

/// Initialize all metrics (call at startup)
pub fn init_metrics() {
    let _ = &*QUERIES_TOTAL;
    let _ = &*QUERY_DURATION_SECONDS;
    let _ = &*BATCH_ENTRIES_TOTAL;
    let _ = &*ADMISSION_DECISIONS_TOTAL;
    let _ = &*DATA_SCANNED_BYTES_TOTAL;
    let _ = &*ACTIVE_CONNECTIONS;
    let _ = &*ACTIVE_ENGINE_LEASES;
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record a completed query
pub fn record_query(surface: &str, status: &str, duration_secs: f64) {
    QUERIES_TOTAL.with_label_values(&[surface, status]).inc();
    QUERY_DURATION_SECONDS
        .with_label_values(&[surface])
        .observe(duration_secs);
}

/// Record one batch sub-query outcome
pub fn record_batch_entry(outcome: &str) {
    BATCH_ENTRIES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a guardrail admission decision
pub fn record_admission(decision: &str) {
    ADMISSION_DECISIONS_TOTAL
        .with_label_values(&[decision])
        .inc();
}

/// Record estimated bytes scanned
pub fn record_data_scanned(bytes: i64) {
    if bytes > 0 {
        DATA_SCANNED_BYTES_TOTAL.inc_by(bytes as f64);
    }
}

/// Track connection lifecycle per protocol
pub fn connection_opened(protocol: &str) {
    ACTIVE_CONNECTIONS.with_label_values(&[protocol]).inc();
}

pub fn connection_closed(protocol: &str) {
    ACTIVE_CONNECTIONS.with_label_values(&[protocol]).dec();
}

/// Track engine lease lifecycle per connector
pub fn engine_lease_acquired(connector: &str) {
    ACTIVE_ENGINE_LEASES.with_label_values(&[connector]).inc();
}

pub fn engine_lease_released(connector: &str) {
    ACTIVE_ENGINE_LEASES.with_label_values(&[connector]).dec();
}
