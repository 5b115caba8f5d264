//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Cache lookups and writes
//! - Warehouse authority calls and latency
//! - Stream event outcomes
//! - Provisioning and product creation
//! - Circuit breaker calls
//! - Service state
//!
//! All metrics are prefixed with `stock_sync_`. Counters end in `_total`.
//! No recorder is installed by this crate; without one every call is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a cache lookup outcome (`hit`, `miss`, `fault`).
pub fn record_cache_lookup(outcome: &str) {
    counter!("stock_sync_cache_lookups_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a cache write outcome.
pub fn record_cache_write(source: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "stock_sync_cache_writes_total",
        "source" => source.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record cache operation latency.
pub fn record_cache_latency(operation: &str, duration: Duration) {
    histogram!("stock_sync_cache_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

/// Record a warehouse authority call.
pub fn record_authority_call(operation: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "stock_sync_authority_calls_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "stock_sync_authority_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an availability-change event outcome.
pub fn record_event(outcome: &str) {
    counter!("stock_sync_events_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record deliveries fetched from the stream.
pub fn record_events_read(source: &str, count: usize) {
    counter!("stock_sync_events_read_total", "source" => source.to_string())
        .increment(count as u64);
}

/// Record a provisioning outcome (whether the warehouse accepted it).
pub fn record_provision(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("stock_sync_provisions_total", "status" => status).increment(1);
}

/// Record a product creation outcome.
pub fn record_product_create(outcome: &str) {
    counter!("stock_sync_product_creates_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record errors by kind.
pub fn record_error(component: &str, kind: &str) {
    counter!(
        "stock_sync_errors_total",
        "component" => component.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call outcome.
pub fn record_circuit_call(circuit_name: &str, outcome: &str) {
    counter!(
        "stock_sync_circuit_calls_total",
        "circuit" => circuit_name.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Gauge for service state.
pub fn set_service_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Connecting" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("stock_sync_service_state").set(value);
}

/// Record a connection attempt to a backing service.
pub fn record_connection(target: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "stock_sync_connections_total",
        "target" => target.to_string(),
        "status" => status
    )
    .increment(1);
}
