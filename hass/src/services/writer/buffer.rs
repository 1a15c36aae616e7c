//! Bounded in-memory queue between the event handler and the batch writer.
//!
//! Below the high-water mark appends are non-blocking. Between high water
//! and capacity the producer is held back for a bounded wait, giving the
//! writer a chance to drain; at capacity the append is rejected outright.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::{
    sync::{Mutex, Notify},
    time::Instant,
};

use crate::services::writer::record::NormalizedRecord;

/// Bounded wait before a backpressured append is resolved either way.
const APPEND_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AppendError {
    #[error("record buffer is full")]
    BufferFull,
    #[error("writer is not accepting records")]
    NotAccepting,
}

pub struct RecordBuffer {
    inner: Mutex<VecDeque<(Instant, NormalizedRecord)>>,
    data: Notify,
    space: Notify,
    capacity: usize,
    high_water: usize,
    accepting: AtomicBool,
    append_wait: Duration,
}

impl RecordBuffer {
    #[must_use]
    pub fn new(capacity: usize, high_water: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(16_384))),
            data: Notify::new(),
            space: Notify::new(),
            capacity,
            high_water,
            accepting: AtomicBool::new(true),
            append_wait: APPEND_WAIT,
        }
    }

    /// Overrides the backpressure wait (tests use millisecond waits).
    #[must_use]
    pub fn with_append_wait(mut self, append_wait: Duration) -> Self {
        self.append_wait = append_wait;
        self
    }

    /// Gate for the writer's fatal state: while closed, appends fail fast.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Relaxed);
    }

    /// Enqueues a record, preserving append order.
    pub async fn append(&self, record: NormalizedRecord) -> Result<(), AppendError> {
        let deadline = Instant::now() + self.append_wait;

        loop {
            if !self.accepting.load(Ordering::Relaxed) {
                return Err(AppendError::NotAccepting);
            }

            {
                let mut queue = self.inner.lock().await;
                let len = queue.len();
                let waited_out = Instant::now() >= deadline;

                if len < self.high_water || (waited_out && len < self.capacity) {
                    queue.push_back((Instant::now(), record));
                    drop(queue);
                    self.data.notify_one();
                    return Ok(());
                }

                if waited_out {
                    return Err(AppendError::BufferFull);
                }
            }

            let _ = tokio::time::timeout_at(deadline, self.space.notified()).await;
        }
    }

    /// Removes up to `max` records in append order.
    pub async fn drain(&self, max: usize) -> Vec<NormalizedRecord> {
        let mut queue = self.inner.lock().await;
        let take = queue.len().min(max);
        let records: Vec<_> = queue.drain(..take).map(|(_, record)| record).collect();
        drop(queue);

        if !records.is_empty() {
            self.space.notify_waiters();
        }
        records
    }

    #[must_use]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    #[must_use]
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Resolves once a flush is due: either a full batch is waiting or the
    /// oldest buffered record has aged past the deadline.
    pub async fn wait_flush_ready(&self, batch_size: usize, batch_timeout: Duration) {
        loop {
            let notified = self.data.notified();
            tokio::pin!(notified);

            let (len, oldest) = {
                let queue = self.inner.lock().await;
                (queue.len(), queue.front().map(|(at, _)| *at))
            };

            if len >= batch_size {
                return;
            }

            match oldest {
                Some(enqueued_at) => {
                    let deadline = enqueued_at + batch_timeout;
                    if Instant::now() >= deadline {
                        return;
                    }
                    tokio::select! {
                        _ = &mut notified => {}
                        () = tokio::time::sleep_until(deadline) => return,
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::writer::record::tests::minimal;

    fn record(n: usize) -> NormalizedRecord {
        minimal(&format!("light.n{n}"), "on")
    }

    #[tokio::test]
    async fn test_append_below_high_water_is_immediate() {
        let buffer = RecordBuffer::new(10, 5);

        for n in 0..4 {
            buffer.append(record(n)).await.unwrap();
        }

        let drained = buffer.drain(100).await;
        let ids: Vec<_> = drained.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, ["light.n0", "light.n1", "light.n2", "light.n3"]);
    }

    #[tokio::test]
    async fn test_append_rejects_at_capacity() {
        let buffer = RecordBuffer::new(4, 2).with_append_wait(Duration::from_millis(5));

        for n in 0..4 {
            buffer.append(record(n)).await.unwrap();
        }

        let err = buffer.append(record(99)).await.unwrap_err();
        assert_eq!(err, AppendError::BufferFull);
        assert_eq!(buffer.len().await, 4);
    }

    #[tokio::test]
    async fn test_backpressured_append_resumes_after_drain() {
        let buffer = std::sync::Arc::new(
            RecordBuffer::new(10, 2).with_append_wait(Duration::from_secs(30)),
        );

        buffer.append(record(0)).await.unwrap();
        buffer.append(record(1)).await.unwrap();

        let blocked = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.append(record(2)).await }
        });

        // Give the producer a moment to hit the high-water wait.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        buffer.drain(2).await;
        blocked.await.unwrap().unwrap();
        assert_eq!(buffer.len().await, 1);
    }

    #[tokio::test]
    async fn test_not_accepting_fails_fast() {
        let buffer = RecordBuffer::new(10, 5);
        buffer.set_accepting(false);

        assert_eq!(
            buffer.append(record(0)).await.unwrap_err(),
            AppendError::NotAccepting
        );

        buffer.set_accepting(true);
        buffer.append(record(0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_ready_on_batch_size() {
        let buffer = RecordBuffer::new(100, 80);
        for n in 0..3 {
            buffer.append(record(n)).await.unwrap();
        }

        // Size trigger: returns without waiting out the deadline.
        tokio::time::timeout(
            Duration::from_millis(50),
            buffer.wait_flush_ready(3, Duration::from_secs(600)),
        )
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_ready_on_deadline() {
        let buffer = RecordBuffer::new(100, 80);
        for n in 0..3 {
            buffer.append(record(n)).await.unwrap();
        }

        // Deadline trigger: 3 < batch_size, resolves once the oldest record
        // ages past the timeout (paused clock auto-advances).
        buffer.wait_flush_ready(100, Duration::from_secs(5)).await;

        let drained = buffer.drain(100).await;
        assert_eq!(drained.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_ready_waits_for_first_record() {
        let buffer = std::sync::Arc::new(RecordBuffer::new(100, 80));

        let waiter = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.wait_flush_ready(10, Duration::from_secs(5)).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        buffer.append(record(0)).await.unwrap();
        // One record, deadline five seconds out: resolves via the deadline.
        waiter.await.unwrap();
    }
}
