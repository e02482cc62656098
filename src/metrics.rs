// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the report queue.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the
//! embedding client chooses the exporter (Prometheus, OTEL, etc.).
//!
//! # Metric Naming Convention
//! - `report_queue_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size gauges/histograms

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record persisted into generation 0.
pub fn record_added(size_bytes: u64) {
    counter!("report_queue_records_added_total").increment(1);
    histogram!("report_queue_record_bytes").record(size_bytes as f64);
}

/// Report collapsed into an existing record.
pub fn record_duplicate() {
    counter!("report_queue_duplicates_total").increment(1);
}

/// Add rejected at a capacity limit.
pub fn record_rejected(reason: &str) {
    counter!(
        "report_queue_rejected_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record evicted past the retry horizon.
pub fn record_evicted() {
    counter!("report_queue_evicted_total").increment(1);
}

/// Delivery attempt outcome.
pub fn record_delivery(status: &str) {
    counter!(
        "report_queue_deliveries_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Delivery attempt latency.
pub fn record_delivery_latency(duration: Duration) {
    histogram!("report_queue_delivery_seconds").record(duration.as_secs_f64());
}

/// Submission dropped by the rate limiter.
pub fn record_rate_limited() {
    counter!("report_queue_rate_limited_total").increment(1);
}

/// Current store occupancy.
pub fn set_store_gauges(records: usize, bytes: u64) {
    gauge!("report_queue_records").set(records as f64);
    gauge!("report_queue_store_bytes").set(bytes as f64);
}

/// Timer that records delivery latency when dropped.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_delivery_latency(self.start.elapsed());
    }
}
