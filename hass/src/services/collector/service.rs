//! Collector service: keeps one hub session alive, forever.
//!
//! The supervisor loop dials, authenticates, subscribes and then pumps
//! events until the session dies, classifying every ending. Reconnects use
//! exponential backoff; a session that stayed up past the success threshold
//! resets the attempt counter, and a rejected token is retried on a much
//! slower cadence, since hammering a bad credential helps nobody.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use engine::{Backoff, Collector, IngestStats, METRICS, Service, enums::SessionState};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    libs::{
        hub_client::{
            frame::CorrelationIds,
            models::RawEvent,
            ws::{self, ConnectConfig, ConnectError},
        },
        metadata::MetadataClient,
    },
    services::{
        Context,
        collector::{
            discovery::DiscoveryTask,
            duration::DurationTracker,
            normalizer::Normalizer,
            registry::RegistryCache,
            session::{self, PendingRequests, SessionEnd, SessionHandle},
            subscription::SubscriptionManager,
        },
        writer::buffer::{AppendError, RecordBuffer},
    },
};

const STATE_CHANGED: &str = "state_changed";
const OUTGOING_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 1_024;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
/// A session that stayed authenticated this long resets the retry counter.
const SUCCESS_RESET_THRESHOLD: Duration = Duration::from_secs(60);
/// Minimum pause before retrying a rejected token.
const AUTH_FAILURE_MIN_DELAY: Duration = Duration::from_secs(60);

pub struct CollectorService {
    connect: ConnectConfig,
    max_retries: i64,
    backoff: Backoff,
    ping_interval: Duration,
    silence_timeout: Duration,
    success_reset_threshold: Duration,
    auth_failure_min_delay: Duration,
    normalizer: Normalizer,
    metadata: MetadataClient,
    registry: Arc<RegistryCache>,
    stats: Arc<IngestStats>,
    buffer: Arc<RecordBuffer>,
}

impl CollectorService {
    pub fn from_context(ctx: &Context) -> anyhow::Result<Self> {
        let durations = Arc::new(DurationTracker::new());

        Ok(Self {
            connect: ConnectConfig::new(ctx.config.hub_url.clone(), ctx.config.hub_token.clone()),
            max_retries: ctx.config.max_retries,
            backoff: Backoff::new(
                Duration::from_secs(1),
                Duration::from_secs(ctx.config.max_retry_delay_sec),
            ),
            ping_interval: Duration::from_secs(ctx.config.ping_interval_sec),
            silence_timeout: Duration::from_secs(ctx.config.silence_timeout_sec),
            success_reset_threshold: SUCCESS_RESET_THRESHOLD,
            auth_failure_min_delay: AUTH_FAILURE_MIN_DELAY,
            normalizer: Normalizer::new(
                Arc::clone(&ctx.registry),
                durations,
                Duration::from_secs(ctx.config.max_clock_skew_sec),
            ),
            metadata: MetadataClient::new(&ctx.config.metadata_url)?,
            registry: Arc::clone(&ctx.registry),
            stats: Arc::clone(&ctx.stats),
            buffer: Arc::clone(&ctx.buffer),
        })
    }
}

impl Collector for CollectorService {}

#[async_trait]
impl Service for CollectorService {
    async fn start(&self, token: CancellationToken) -> anyhow::Result<()> {
        let mut consecutive_failures: u32 = 0;

        while !token.is_cancelled() {
            self.stats.record_connection_attempt();
            let session_started = tokio::time::Instant::now();

            let end = self.run_session(&token).await;
            METRICS.record_session_end(&end.to_string());
            self.stats.set_subscribed(false);
            self.stats.set_session_state(SessionState::Closed);

            if end == SessionEnd::Cancelled {
                info!("session cancelled, collector stopping");
                break;
            }

            self.stats.record_connection_failure();
            self.stats.record_error(end.to_string());

            if session_started.elapsed() >= self.success_reset_threshold {
                consecutive_failures = 0;
            }
            consecutive_failures += 1;

            if self.max_retries >= 0 && u64::from(consecutive_failures) >= self.max_retries as u64 {
                warn!(
                    failures = consecutive_failures,
                    "giving up after configured retries"
                );
                break;
            }

            let mut delay = self.backoff.delay(consecutive_failures);
            if end == SessionEnd::AuthFailed {
                delay = delay.max(self.auth_failure_min_delay);
            }

            METRICS.record_reconnect(&end.to_string());
            info!(
                outcome = %end,
                attempt = consecutive_failures,
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );

            tokio::select! {
                _ = token.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.stats.set_session_state(SessionState::Idle);
        Ok(())
    }
}

impl CollectorService {
    /// Drives one session through its full lifecycle and classifies the end.
    async fn run_session(&self, token: &CancellationToken) -> SessionEnd {
        self.stats.set_session_state(SessionState::Connecting);
        let (mut writer, mut reader) = match ws::dial(&self.connect).await {
            Ok(halves) => halves,
            Err(e) => {
                warn!(error = %e, "failed to dial hub");
                return SessionEnd::DialFailed;
            }
        };

        self.stats.set_session_state(SessionState::Authenticating);
        let ha_version = match ws::authenticate(&mut writer, &mut reader, &self.connect).await {
            Ok(version) => version,
            Err(ConnectError::AuthInvalid(message)) => {
                error!(message, "hub rejected the access token");
                return SessionEnd::AuthFailed;
            }
            Err(e @ ConnectError::Protocol(_)) => {
                warn!(error = %e, "handshake protocol violation");
                return SessionEnd::ProtocolError;
            }
            Err(e) => {
                warn!(error = %e, "handshake failed");
                return SessionEnd::DialFailed;
            }
        };
        info!(ha_version, "authenticated to hub");

        let session_token = token.child_token();
        let (out_tx, out_rx) = mpsc::channel::<Message>(OUTGOING_CHANNEL_CAPACITY);
        let (events_tx, mut events_rx) = mpsc::channel::<RawEvent>(EVENT_CHANNEL_CAPACITY);
        let (end_tx, mut end_rx) = mpsc::channel::<SessionEnd>(1);
        let pending: Arc<tokio::sync::Mutex<PendingRequests>> =
            Arc::new(tokio::sync::Mutex::new(HashMap::new()));
        let ids = Arc::new(CorrelationIds::new());
        let last_frame: session::LastFrameInstant =
            Arc::new(parking_lot::Mutex::new(tokio::time::Instant::now()));
        let handle = SessionHandle::new(
            out_tx.clone(),
            Arc::clone(&pending),
            Arc::clone(&ids),
            RESPONSE_TIMEOUT,
        );
        let subscriptions = Arc::new(SubscriptionManager::new());

        let mut tasks: JoinSet<()> = JoinSet::new();
        tasks.spawn(session::writer_task(
            writer,
            out_rx,
            session_token.clone(),
            end_tx.clone(),
        ));
        tasks.spawn(session::reader_task(
            reader,
            Arc::clone(&pending),
            Arc::clone(&subscriptions),
            out_tx.clone(),
            Arc::clone(&last_frame),
            session_token.clone(),
            end_tx.clone(),
        ));

        self.stats.set_session_state(SessionState::Subscribing);
        let subscription_id = match subscriptions
            .subscribe(&handle, STATE_CHANGED, events_tx)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to subscribe to state changes");
                session_token.cancel();
                while tasks.join_next().await.is_some() {}
                return SessionEnd::SubscribeFailed;
            }
        };
        debug!(subscription_id, "subscribed to state_changed events");

        self.stats.record_connection_success();
        self.stats.set_subscribed(true);
        self.stats.set_session_state(SessionState::Active);

        tasks.spawn(session::ping_task(
            out_tx.clone(),
            Arc::clone(&ids),
            Arc::clone(&last_frame),
            self.ping_interval,
            self.silence_timeout,
            session_token.clone(),
            end_tx.clone(),
        ));

        // One discovery per session.
        tasks.spawn({
            let discovery = DiscoveryTask::new(
                handle.clone(),
                self.metadata.clone(),
                Arc::clone(&self.registry),
            );
            let discovery_token = session_token.clone();
            async move { discovery.run(discovery_token).await }
        });

        let end = loop {
            tokio::select! {
                _ = token.cancelled() => break SessionEnd::Cancelled,
                maybe_end = end_rx.recv() => break maybe_end.unwrap_or(SessionEnd::SocketClosed),
                maybe_event = events_rx.recv() => match maybe_event {
                    Some(event) => self.handle_event(event).await,
                    None => break SessionEnd::SocketClosed,
                }
            }
        };

        if end == SessionEnd::Cancelled {
            // Polite teardown: drop the server-side subscription first.
            if let Err(e) = subscriptions.unsubscribe(&handle, subscription_id).await {
                debug!(error = %e, "unsubscribe during shutdown failed");
            }
        }

        session_token.cancel();
        while tasks.join_next().await.is_some() {}
        session::notify_pending(&pending).await;

        end
    }

    /// Normalizes a dispatched event and hands it to the batch writer.
    /// Per-event failures are counted and never kill the session.
    async fn handle_event(&self, event: RawEvent) {
        METRICS.record_event_received(&event.event_type);
        self.stats.record_event_received();

        if event.event_type != STATE_CHANGED {
            debug!(event_type = %event.event_type, "ignoring non state_changed event");
            return;
        }

        let received_at = Utc::now();
        match self.normalizer.normalize(&event, received_at) {
            Ok(record) => match self.buffer.append(record).await {
                Ok(()) => {}
                Err(AppendError::BufferFull) => {
                    self.stats.record_records_dropped(1);
                    METRICS.record_records_dropped("buffer_full", 1);
                    warn!("record buffer full, dropping event");
                }
                Err(AppendError::NotAccepting) => {
                    self.stats.record_records_dropped(1);
                    METRICS.record_records_dropped("writer_unavailable", 1);
                }
            },
            Err(e) => {
                self.stats.record_event_rejected();
                METRICS.record_event_rejected(e.reason());
                debug!(
                    entity_id = event.data.entity_id.as_deref().unwrap_or("?"),
                    error = %e,
                    "rejected event"
                );
            }
        }
    }
}
