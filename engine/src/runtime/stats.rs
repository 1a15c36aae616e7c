use std::{
    sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;

use crate::enums::SessionState;

const RATE_WINDOW_SECS: u64 = 60;

/// Process-wide ingestion counters, read by the health surface.
///
/// All counters are atomics; the health handler takes a [`StatsSnapshot`]
/// rather than reading fields piecemeal.
#[derive(Debug)]
pub struct IngestStats {
    started_at: Instant,
    session_state: AtomicU8,
    connection_attempts: AtomicU64,
    successful_connections: AtomicU64,
    failed_connections: AtomicU64,
    subscribed: AtomicBool,
    events_received: AtomicU64,
    events_rejected: AtomicU64,
    records_written: AtomicU64,
    batches_written: AtomicU64,
    records_dropped: AtomicU64,
    write_errors: AtomicU64,
    writer_fatal: AtomicBool,
    last_write_unix_ms: AtomicU64,
    last_error: Mutex<Option<LastError>>,
    rate: RateWindow,
}

/// Most recent error classification with its wall-clock instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub kind: String,
    pub at_unix_ms: u64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub session_state: SessionState,
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub is_subscribed: bool,
    pub events_received: u64,
    pub events_rejected: u64,
    pub event_rate_per_minute: u64,
    pub records_written: u64,
    pub batches_written: u64,
    pub records_dropped: u64,
    pub write_errors: u64,
    pub writer_fatal: bool,
    pub last_write_unix_ms: Option<u64>,
    pub last_error: Option<LastError>,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            session_state: AtomicU8::new(SessionState::Idle as u8),
            connection_attempts: AtomicU64::new(0),
            successful_connections: AtomicU64::new(0),
            failed_connections: AtomicU64::new(0),
            subscribed: AtomicBool::new(false),
            events_received: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            batches_written: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            writer_fatal: AtomicBool::new(false),
            last_write_unix_ms: AtomicU64::new(0),
            last_error: Mutex::new(None),
            rate: RateWindow::new(),
        }
    }

    pub fn set_session_state(&self, state: SessionState) {
        self.session_state.store(state as u8, Ordering::Relaxed);
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        SessionState::from_u8(self.session_state.load(Ordering::Relaxed))
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_success(&self) {
        self.successful_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_failure(&self) {
        self.failed_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::Relaxed);
    }

    pub fn record_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        self.rate.record(unix_now_secs());
    }

    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn events_rejected(&self) -> u64 {
        self.events_rejected.load(Ordering::Relaxed)
    }

    pub fn record_write_success(&self, records: u64) {
        self.records_written.fetch_add(records, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.last_write_unix_ms
            .store(unix_now_millis(), Ordering::Relaxed);
    }

    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_records_dropped(&self, count: u64) {
        self.records_dropped.fetch_add(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    pub fn set_writer_fatal(&self, fatal: bool) {
        self.writer_fatal.store(fatal, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: impl Into<String>) {
        *self.last_error.lock() = Some(LastError {
            kind: kind.into(),
            at_unix_ms: unix_now_millis(),
        });
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let last_write = self.last_write_unix_ms.load(Ordering::Relaxed);

        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            session_state: self.session_state(),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            successful_connections: self.successful_connections.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            is_subscribed: self.subscribed.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            event_rate_per_minute: self.rate.sum(unix_now_secs()),
            records_written: self.records_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            writer_fatal: self.writer_fatal.load(Ordering::Relaxed),
            last_write_unix_ms: (last_write > 0).then_some(last_write),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// Ring of per-second buckets for the rolling per-minute event rate.
///
/// Buckets are reclaimed lazily by stamping them with the epoch second they
/// belong to; slightly lossy under contention, which is fine for a health
/// counter.
#[derive(Debug)]
struct RateWindow {
    counts: [AtomicU64; RATE_WINDOW_SECS as usize],
    stamps: [AtomicU64; RATE_WINDOW_SECS as usize],
}

impl RateWindow {
    fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            stamps: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn record(&self, now_secs: u64) {
        let idx = (now_secs % RATE_WINDOW_SECS) as usize;
        let stamp = self.stamps[idx].load(Ordering::Relaxed);
        if stamp != now_secs
            && self.stamps[idx]
                .compare_exchange(stamp, now_secs, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.counts[idx].store(0, Ordering::Relaxed);
        }
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    fn sum(&self, now_secs: u64) -> u64 {
        let oldest = now_secs.saturating_sub(RATE_WINDOW_SECS - 1);
        (0..RATE_WINDOW_SECS as usize)
            .filter(|&i| self.stamps[i].load(Ordering::Relaxed) >= oldest)
            .map(|i| self.counts[i].load(Ordering::Relaxed))
            .sum()
    }
}

fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
