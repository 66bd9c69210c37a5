//! Metrics instrumentation for the session manager.
//!
//! Uses the `metrics` facade; the host installs an exporter (the simulation
//! binary installs Prometheus). Without a recorder every call is a no-op.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const SESSIONS_OPEN: &str = "rooms_sessions_open";
    pub const SESSIONS_EVICTED_TOTAL: &str = "rooms_sessions_evicted_total";
    pub const RECONCILE_PASSES_TOTAL: &str = "rooms_reconcile_passes_total";
    pub const STREAM_ATTACHMENTS_TOTAL: &str = "rooms_stream_attachments_total";
    pub const MESSAGES_DELIVERED_TOTAL: &str = "rooms_messages_delivered_total";
    pub const MESSAGES_DROPPED_TOTAL: &str = "rooms_messages_dropped_total";
    pub const MESSAGES_DELETED_TOTAL: &str = "rooms_messages_deleted_total";
    pub const RESYNC_REQUESTS_TOTAL: &str = "rooms_resync_requests_total";
    pub const RESYNC_ERRORS_TOTAL: &str = "rooms_resync_errors_total";
}

/// Describe every metric this crate records.
pub fn describe() {
    metrics::describe_gauge!(names::SESSIONS_OPEN, "Sessions currently in the registry");
    metrics::describe_counter!(
        names::SESSIONS_EVICTED_TOTAL,
        "Sessions closed by the LRU policy"
    );
    metrics::describe_counter!(names::RECONCILE_PASSES_TOTAL, "Reconciler passes run");
    metrics::describe_counter!(
        names::STREAM_ATTACHMENTS_TOTAL,
        "Room stream attachments made"
    );
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED_TOTAL,
        "Streamed messages delivered downstream"
    );
    metrics::describe_counter!(
        names::MESSAGES_DROPPED_TOTAL,
        "Streamed messages dropped before delivery"
    );
    metrics::describe_counter!(
        names::MESSAGES_DELETED_TOTAL,
        "Messages removed by delete notifications"
    );
    metrics::describe_counter!(
        names::RESYNC_REQUESTS_TOTAL,
        "Missed-message requests sent after reconnect"
    );
    metrics::describe_counter!(names::RESYNC_ERRORS_TOTAL, "Missed-message requests that failed");
}

/// Update the open session gauge.
pub fn set_open_sessions(count: usize) {
    gauge!(names::SESSIONS_OPEN).set(count as f64);
}

/// Record an LRU eviction.
pub fn record_eviction() {
    counter!(names::SESSIONS_EVICTED_TOTAL).increment(1);
}

/// Record a reconciler pass.
pub fn record_reconcile_pass() {
    counter!(names::RECONCILE_PASSES_TOTAL).increment(1);
}

/// Record a stream attachment.
pub fn record_attachment() {
    counter!(names::STREAM_ATTACHMENTS_TOTAL).increment(1);
}

/// Record a delivered message.
pub fn record_delivered() {
    counter!(names::MESSAGES_DELIVERED_TOTAL).increment(1);
}

/// Record a dropped message.
pub fn record_dropped(reason: &'static str) {
    counter!(names::MESSAGES_DROPPED_TOTAL, "reason" => reason).increment(1);
}

/// Record deleted messages.
pub fn record_deleted(count: usize) {
    counter!(names::MESSAGES_DELETED_TOTAL).increment(count as u64);
}

/// Record a missed-message request.
pub fn record_resync_request() {
    counter!(names::RESYNC_REQUESTS_TOTAL).increment(1);
}

/// Record a failed missed-message request.
pub fn record_resync_error() {
    counter!(names::RESYNC_ERRORS_TOTAL).increment(1);
}
