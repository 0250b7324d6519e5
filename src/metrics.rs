// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation.
//!
//! Uses the `metrics` crate facade; the embedding process picks the exporter.
//!
//! # Metric Naming Convention
//! - `labsync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `category`: new_request, update_request, update_sample
//! - `operation`: add_request, update_request, update_sample
//! - `outcome`: success, or the error kind

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Record a feed message routed into a category (or "unmatched").
pub fn record_message_routed(category: &str) {
    counter!(
        "labsync_messages_routed_total",
        "category" => category.to_string()
    )
    .increment(1);
}

/// Record a payload that could not be decoded and was left for redelivery.
pub fn record_decode_failure(category: &str) {
    counter!(
        "labsync_decode_failures_total",
        "category" => category.to_string()
    )
    .increment(1);
}

/// Record the acknowledgement decision for a finished task.
pub fn record_ack(category: &str, acked: bool) {
    counter!(
        "labsync_acks_total",
        "category" => category.to_string(),
        "acked" => if acked { "true" } else { "false" }
    )
    .increment(1);
}

/// Set the number of sync tasks currently running.
pub fn set_in_flight(count: usize) {
    gauge!("labsync_tasks_in_flight").set(count as f64);
}

/// Record the outcome of one engine operation.
pub fn record_sync(operation: &str, outcome: &str) {
    counter!(
        "labsync_sync_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record engine operation latency.
pub fn record_sync_latency(operation: &str, duration: Duration) {
    histogram!(
        "labsync_sync_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record how long an add left its request observable without its samples
/// (from the replace delete to the request insert).
pub fn record_replace_window(duration: Duration) {
    histogram!("labsync_replace_window_seconds").record(duration.as_secs_f64());
}

/// Record a compensation (rollback delete) and whether it succeeded.
pub fn record_compensation(stage: &str, success: bool) {
    counter!(
        "labsync_compensations_total",
        "stage" => stage.to_string(),
        "status" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record an update that affected more than one row.
pub fn record_duplicate_update(table: &str) {
    counter!(
        "labsync_duplicate_updates_total",
        "table" => table.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call outcome.
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "labsync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set dispatcher state (0 = Listening, 1 = Draining, 2 = Stopped).
pub fn set_dispatch_state(state: u8) {
    gauge!("labsync_dispatch_state").set(f64::from(state));
}

/// Records operation latency on drop.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self { operation, start: Instant::now() }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_sync_latency(self.operation, self.start.elapsed());
    }
}
