//! Batch writer: drains the record buffer into the time-series store.
//!
//! One worker owns the flush path, so batches are strictly sequential. A
//! flush happens when a full batch is buffered, when the oldest buffered
//! record ages past the deadline, or on shutdown with a bounded deadline.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use engine::{Backoff, IngestStats, METRICS, Service, Writer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    libs::influx::{StoreClient, StoreError},
    services::writer::{buffer::RecordBuffer, record::NormalizedRecord},
};

/// Tunables for the flush path.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub measurement: String,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub shutdown_flush_timeout: Duration,
    pub max_retries_per_batch: u32,
    pub retry_backoff: Backoff,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            measurement: "state_history".to_owned(),
            batch_size: 100,
            batch_timeout: Duration::from_secs(5),
            shutdown_flush_timeout: Duration::from_secs(10),
            max_retries_per_batch: 3,
            retry_backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
        }
    }
}

pub struct WriterService {
    store: StoreClient,
    buffer: Arc<RecordBuffer>,
    stats: Arc<IngestStats>,
    options: WriterOptions,
}

impl WriterService {
    pub fn new(
        store: StoreClient,
        buffer: Arc<RecordBuffer>,
        stats: Arc<IngestStats>,
        options: WriterOptions,
    ) -> Self {
        Self {
            store,
            buffer,
            stats,
            options,
        }
    }
}

impl Writer for WriterService {}

#[async_trait]
impl Service for WriterService {
    async fn start(&self, token: CancellationToken) -> anyhow::Result<()> {
        // A restart after a fatal error resets the writer.
        self.stats.set_writer_fatal(false);
        self.buffer.set_accepting(true);
        info!(
            batch_size = self.options.batch_size,
            batch_timeout_ms = self.options.batch_timeout.as_millis() as u64,
            "batch writer started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.shutdown_flush().await;
                    return Ok(());
                }
                () = self.buffer.wait_flush_ready(self.options.batch_size, self.options.batch_timeout) => {
                    let batch = self.buffer.drain(self.options.batch_size).await;
                    if batch.is_empty() {
                        continue;
                    }

                    if let Err(e) = self.write_batch(batch).await {
                        self.buffer.set_accepting(false);
                        self.stats.set_writer_fatal(true);
                        self.stats.record_error(e.kind());
                        return Err(anyhow::Error::new(e).context("store rejected credentials"));
                    }
                }
            }
        }
    }
}

impl WriterService {
    /// Flushes a batch with retries and type-conflict isolation.
    ///
    /// Conflicting chunks are halved until the offending records stand
    /// alone and can be dropped; the worklist keeps append order for
    /// everything that survives. Only fatal (authorization) errors bubble
    /// up.
    async fn write_batch(&self, batch: Vec<NormalizedRecord>) -> Result<(), StoreError> {
        let mut chunks: Vec<Vec<NormalizedRecord>> = vec![batch];

        while let Some(chunk) = chunks.pop() {
            match self.write_chunk(&chunk).await {
                Ok(()) => {
                    self.stats.record_write_success(chunk.len() as u64);
                    METRICS.record_records_written(chunk.len() as u64);
                    METRICS.record_batch_written();
                }
                Err(e @ StoreError::Unauthorized { .. }) => {
                    error!(error = %e, "fatal store error, writer stopping");
                    return Err(e);
                }
                Err(StoreError::TypeConflict { message }) if chunk.len() == 1 => {
                    warn!(
                        entity_id = %chunk[0].entity_id,
                        message,
                        "dropping record after field type conflict"
                    );
                    self.stats.record_records_dropped(1);
                    METRICS.record_records_dropped("type_conflict", 1);
                }
                Err(StoreError::TypeConflict { .. }) => {
                    let mut head = chunk;
                    let tail = head.split_off(head.len() / 2);
                    chunks.push(tail);
                    chunks.push(head);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        records = chunk.len(),
                        "dropping batch after failed write"
                    );
                    self.stats.record_records_dropped(chunk.len() as u64);
                    METRICS.record_records_dropped("write_failed", chunk.len() as u64);
                }
            }
        }

        Ok(())
    }

    /// One network call, retried with backoff while the failure is
    /// retryable. A 429 retry hint stretches the delay.
    async fn write_chunk(&self, records: &[NormalizedRecord]) -> Result<(), StoreError> {
        let body = self.render_batch(records);
        let mut attempt: u32 = 0;

        loop {
            match self.store.write(body.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    METRICS.record_store_write_error(e.kind());
                    self.stats.record_write_error();

                    if !e.is_retryable() || attempt >= self.options.max_retries_per_batch {
                        return Err(e);
                    }

                    attempt += 1;
                    let mut delay = self.options.retry_backoff.delay(attempt);
                    if let StoreError::RateLimited {
                        retry_after: Some(hint),
                    } = &e
                    {
                        delay = delay.max(*hint);
                    }

                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "retrying batch write");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Drains and writes whatever is buffered, bounded by the shutdown
    /// deadline; anything still unwritten afterwards is dropped and counted.
    async fn shutdown_flush(&self) {
        self.buffer.set_accepting(false);
        let deadline = tokio::time::Instant::now() + self.options.shutdown_flush_timeout;

        loop {
            let batch = self.buffer.drain(self.options.batch_size).await;
            if batch.is_empty() {
                break;
            }
            let in_flight = batch.len() as u64;

            match tokio::time::timeout_at(deadline, self.write_batch(batch)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "fatal store error during shutdown flush");
                    break;
                }
                Err(_) => {
                    self.stats.record_records_dropped(in_flight);
                    METRICS.record_records_dropped("shutdown", in_flight);
                    break;
                }
            }
        }

        let remaining = self.buffer.len().await as u64;
        if remaining > 0 {
            warn!(remaining, "dropping records at shutdown deadline");
            self.stats.record_records_dropped(remaining);
            METRICS.record_records_dropped("shutdown", remaining);
        }
    }

    fn render_batch(&self, records: &[NormalizedRecord]) -> String {
        let mut body = String::new();
        for record in records {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(&record.to_line_protocol(&self.options.measurement));
        }
        body
    }
}
