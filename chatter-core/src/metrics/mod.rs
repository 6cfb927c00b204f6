//! Metric names and descriptions
//!
//! Recording goes through the `metrics` facade; the api binary decides whether
//! an exporter is installed.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

pub const MESSAGES_INGESTED: &str = "chatter.messages.ingested";
pub const MESSAGES_DELIVERED: &str = "chatter.messages.delivered";
pub const SUBSCRIPTIONS_ACTIVE: &str = "chatter.subscriptions.active";
pub const CHANNELS_MATERIALIZED: &str = "chatter.channels.materialized";
pub const CALLS_REJECTED: &str = "chatter.calls.rejected";
pub const STORE_OPERATION_DURATION: &str = "chatter.store.operation.duration_ms";

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!(MESSAGES_INGESTED, "Messages committed to the store and appended to a channel");
    describe_counter!(MESSAGES_DELIVERED, "Messages forwarded to live subscribers");
    describe_gauge!(SUBSCRIPTIONS_ACTIVE, "Number of open live subscriptions");
    describe_gauge!(CHANNELS_MATERIALIZED, "Channels held in the in-memory registry");
    describe_counter!(CALLS_REJECTED, "Calls aborted by an interceptor stage");
    describe_histogram!(STORE_OPERATION_DURATION, "Store operation duration in milliseconds");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a gauge metric
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}

/// Adjust a gauge by `delta`
pub fn adjust_gauge(name: &'static str, delta: f64) {
    if delta >= 0.0 {
        gauge!(name).increment(delta);
    } else {
        gauge!(name).decrement(-delta);
    }
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    operation: &'static str,
    start: Instant,
}

impl Timer {
    /// Create a new timer labelled with the store operation
    pub fn new(name: &'static str, operation: &'static str) -> Self {
        Self {
            name,
            operation,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        let duration = self.start.elapsed();
        histogram!(self.name, "operation" => self.operation).record(duration.as_secs_f64() * 1000.0);
    }
}
