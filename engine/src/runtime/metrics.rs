use std::sync::LazyLock;

use metrics::{counter, describe_counter};

/// Global metrics registry for the application.
pub static METRICS: LazyLock<Metrics> = LazyLock::new(|| {
    describe_counter!(
        "hub_events_received_total",
        "Total number of events received from the hub",
    );

    describe_counter!(
        "hub_events_rejected_total",
        "Total number of events rejected during normalization",
    );

    describe_counter!(
        "hub_sessions_ended_total",
        "Total number of hub sessions that ended, by outcome",
    );

    describe_counter!(
        "hub_reconnects_total",
        "Total number of reconnect attempts scheduled after a failed session, by outcome",
    );

    describe_counter!(
        "records_written_total",
        "Total number of records written to the time-series store",
    );

    describe_counter!(
        "batches_written_total",
        "Total number of batches flushed to the time-series store",
    );

    describe_counter!(
        "records_dropped_total",
        "Total number of records dropped before reaching the store",
    );

    describe_counter!(
        "store_write_errors_total",
        "Total number of failed store write calls, by kind",
    );

    describe_counter!(
        "discovery_runs_total",
        "Total number of registry discovery runs, by outcome",
    );

    Metrics
});

/// Application metrics facade (static methods for incrementing counters)
pub struct Metrics;

impl Metrics {
    /// Increments the received events counter for an event type.
    pub fn record_event_received(&self, event_type: &str) {
        counter!(
            "hub_events_received_total",
            "event_type" => event_type.to_owned(),
        )
        .increment(1);
    }

    /// Increments the rejected events counter with the rejection reason.
    pub fn record_event_rejected(&self, reason: &'static str) {
        counter!("hub_events_rejected_total", "reason" => reason).increment(1);
    }

    /// Increments the sessions-ended counter with the session outcome.
    pub fn record_session_end(&self, outcome: &str) {
        counter!("hub_sessions_ended_total", "outcome" => outcome.to_owned()).increment(1);
    }

    /// Increments the reconnects counter with the outcome that forced the
    /// reconnect. Fires only when a retry is actually scheduled, so a
    /// cancelled session or a supervisor that gives up never counts here.
    pub fn record_reconnect(&self, outcome: &str) {
        counter!("hub_reconnects_total", "outcome" => outcome.to_owned()).increment(1);
    }

    /// Adds to the written records counter after an acknowledged flush.
    pub fn record_records_written(&self, count: u64) {
        counter!("records_written_total").increment(count);
    }

    /// Increments the written batches counter.
    pub fn record_batch_written(&self) {
        counter!("batches_written_total").increment(1);
    }

    /// Adds to the dropped records counter with the drop reason.
    pub fn record_records_dropped(&self, reason: &'static str, count: u64) {
        counter!("records_dropped_total", "reason" => reason).increment(count);
    }

    /// Increments the store write errors counter with the error kind.
    pub fn record_store_write_error(&self, kind: &str) {
        counter!("store_write_errors_total", "kind" => kind.to_owned()).increment(1);
    }

    /// Increments the discovery runs counter with the run outcome.
    pub fn record_discovery_run(&self, outcome: &'static str) {
        counter!("discovery_runs_total", "outcome" => outcome).increment(1);
    }
}
