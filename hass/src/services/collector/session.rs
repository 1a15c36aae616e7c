//! Plumbing for one connected hub session.
//!
//! The socket is split once: a single writer task owns the sink and is fed
//! through an mpsc channel, so no two producers ever interleave a write. The
//! reader task routes `result` frames to per-request oneshot waiters and
//! `event` frames to the subscription manager. A ping task keeps the
//! connection honest and force-closes it after a silence window.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::Display;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    libs::hub_client::{
        frame::{self, ClientFrame, CorrelationIds, ServerFrame},
        ws,
    },
    services::collector::subscription::SubscriptionManager,
};

/// Consecutive malformed frames tolerated before the session is killed.
pub(crate) const MALFORMED_FRAME_LIMIT: u32 = 10;

/// Why a session ended, reported to the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionEnd {
    Cancelled,
    DialFailed,
    AuthFailed,
    SubscribeFailed,
    ProtocolError,
    PingTimeout,
    SocketClosed,
}

pub(crate) type PendingRequests = HashMap<u64, oneshot::Sender<Result<Value, RequestError>>>;

pub(crate) type LastFrameInstant = Arc<parking_lot::Mutex<tokio::time::Instant>>;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("session closed before response")]
    SessionClosed,
    #[error("hub returned error: {0}")]
    Remote(String),
    #[error("failed to deserialize result: {0}")]
    Deserialize(String),
    #[error("failed to submit frame: {0}")]
    Send(String),
}

/// Cheap cloneable handle for correlated request/response over the session's
/// single writer channel.
#[derive(Clone)]
pub struct SessionHandle {
    out_tx: mpsc::Sender<Message>,
    pending: Arc<Mutex<PendingRequests>>,
    ids: Arc<CorrelationIds>,
    response_timeout: Duration,
}

impl SessionHandle {
    pub(crate) fn new(
        out_tx: mpsc::Sender<Message>,
        pending: Arc<Mutex<PendingRequests>>,
        ids: Arc<CorrelationIds>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            out_tx,
            pending,
            ids,
            response_timeout,
        }
    }

    /// Sends a command frame and awaits its `result` with the default
    /// timeout. The closure receives the freshly issued correlation id;
    /// the id is returned alongside the deserialized result.
    pub async fn request<R, F>(&self, make: F) -> Result<(u64, R), RequestError>
    where
        R: DeserializeOwned,
        F: FnOnce(u64) -> ClientFrame + Send,
    {
        self.request_with_timeout(make, self.response_timeout).await
    }

    pub async fn request_with_timeout<R, F>(
        &self,
        make: F,
        timeout: Duration,
    ) -> Result<(u64, R), RequestError>
    where
        R: DeserializeOwned,
        F: FnOnce(u64) -> ClientFrame + Send,
    {
        let id = self.ids.next_id();
        let request = make(id);

        let (response_tx, response_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, response_tx);
        }

        let payload = frame::encode(&request).map_err(|e| RequestError::Send(e.to_string()))?;

        if let Err(e) = self.out_tx.send(Message::Text(payload.into())).await {
            self.pending.lock().await.remove(&id);
            return Err(RequestError::Send(e.to_string()));
        }

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(Ok(value))) => serde_json::from_value::<R>(value)
                .map(|result| (id, result))
                .map_err(|e| RequestError::Deserialize(e.to_string())),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(RequestError::SessionClosed),
            Err(_) => {
                // Remove request from pending due to timeout
                self.pending.lock().await.remove(&id);
                Err(RequestError::Timeout(timeout))
            }
        }
    }
}

/// Owns the sink half; everything outgoing goes through `out_rx`.
pub(crate) async fn writer_task(
    mut writer: ws::Writer,
    mut out_rx: mpsc::Receiver<Message>,
    token: CancellationToken,
    end_tx: mpsc::Sender<SessionEnd>,
) {
    use futures_util::SinkExt;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = writer.send(Message::Close(None)).await;
                break;
            }
            maybe_message = out_rx.recv() => match maybe_message {
                Some(message) => {
                    if let Err(e) = writer.send(message).await {
                        error!(error = %e, "failed to write frame");
                        let _ = end_tx.try_send(SessionEnd::SocketClosed);
                        break;
                    }
                }
                None => break,
            }
        }
    }
}

/// Reads frames off the socket and dispatches them in receive order.
pub(crate) async fn reader_task(
    mut reader: ws::Reader,
    pending: Arc<Mutex<PendingRequests>>,
    subscriptions: Arc<SubscriptionManager>,
    out_tx: mpsc::Sender<Message>,
    last_frame: LastFrameInstant,
    token: CancellationToken,
    end_tx: mpsc::Sender<SessionEnd>,
) {
    use futures_util::StreamExt;

    let mut consecutive_malformed: u32 = 0;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            message = reader.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    *last_frame.lock() = tokio::time::Instant::now();

                    match frame::decode(&text) {
                        Ok(incoming) => {
                            consecutive_malformed = 0;
                            route_frame(incoming, &pending, &subscriptions).await;
                        }
                        Err(e) => {
                            consecutive_malformed += 1;
                            debug!(error = %e, "dropping malformed frame");
                            if consecutive_malformed >= MALFORMED_FRAME_LIMIT {
                                error!(
                                    count = consecutive_malformed,
                                    "too many consecutive malformed frames"
                                );
                                let _ = end_tx.try_send(SessionEnd::ProtocolError);
                                break;
                            }
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    *last_frame.lock() = tokio::time::Instant::now();
                    let _ = out_tx.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    *last_frame.lock() = tokio::time::Instant::now();
                }
                Some(Ok(Message::Close(close))) => {
                    debug!(?close, "hub closed the socket");
                    let _ = end_tx.try_send(SessionEnd::SocketClosed);
                    break;
                }
                Some(Err(e)) => {
                    error!(error = %e, "websocket read error");
                    let _ = end_tx.try_send(SessionEnd::SocketClosed);
                    break;
                }
                None => {
                    debug!("websocket stream ended");
                    let _ = end_tx.try_send(SessionEnd::SocketClosed);
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    notify_pending(&pending).await;
}

/// Routes a decoded frame to the matching waiter or subscription.
pub(crate) async fn route_frame(
    incoming: ServerFrame,
    pending: &Arc<Mutex<PendingRequests>>,
    subscriptions: &Arc<SubscriptionManager>,
) {
    match incoming {
        ServerFrame::Result {
            id,
            success,
            result,
            error,
        } => {
            let waiter = pending.lock().await.remove(&id);
            match waiter {
                Some(response_tx) => {
                    let outcome = if success {
                        Ok(result.unwrap_or(Value::Null))
                    } else {
                        let detail =
                            error.map_or_else(|| "unknown error".to_owned(), |e| e.describe());
                        Err(RequestError::Remote(detail))
                    };
                    let _ = response_tx.send(outcome);
                }
                None => debug!(id, "result for unknown or duplicate correlation id"),
            }
        }
        ServerFrame::Event { id, event } => {
            if !subscriptions.dispatch(id, event).await {
                debug!(id, "event for unknown subscription");
            }
        }
        ServerFrame::Pong { .. } => {}
        ServerFrame::AuthRequired { .. }
        | ServerFrame::AuthOk { .. }
        | ServerFrame::AuthInvalid { .. } => {
            debug!("unexpected handshake frame in active session");
        }
        ServerFrame::Unknown => debug!("ignoring unknown message type"),
    }
}

/// Application-level liveness: ping on a cadence, close on silence.
pub(crate) async fn ping_task(
    out_tx: mpsc::Sender<Message>,
    ids: Arc<CorrelationIds>,
    last_frame: LastFrameInstant,
    ping_interval: Duration,
    silence_timeout: Duration,
    token: CancellationToken,
    end_tx: mpsc::Sender<SessionEnd>,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; the session just came up.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let idle = last_frame.lock().elapsed();
                if idle >= silence_timeout {
                    warn!(idle_ms = idle.as_millis() as u64, "no frames received within silence window");
                    let _ = end_tx.try_send(SessionEnd::PingTimeout);
                    break;
                }

                if let Ok(ping) = frame::encode(&ClientFrame::Ping { id: ids.next_id() })
                    && out_tx.send(Message::Text(ping.into())).await.is_err()
                {
                    break;
                }
            }
        }
    }
}

/// Fails all in-flight requests, e.g. when the socket goes away.
pub(crate) async fn notify_pending(pending: &Arc<Mutex<PendingRequests>>) {
    let mut pending = pending.lock().await;
    for (_, response_tx) in pending.drain() {
        let _ = response_tx.send(Err(RequestError::SessionClosed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_handle(
        capacity: usize,
        timeout: Duration,
    ) -> (
        SessionHandle,
        mpsc::Receiver<Message>,
        Arc<Mutex<PendingRequests>>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let pending: Arc<Mutex<PendingRequests>> = Arc::new(Mutex::new(HashMap::new()));
        let ids = Arc::new(CorrelationIds::new());
        let handle = SessionHandle::new(out_tx, pending.clone(), ids, timeout);
        (handle, out_rx, pending)
    }

    fn respond(id: u64, body: &str) -> ServerFrame {
        frame::decode(&format!(
            r#"{{"id":{id},"type":"result","success":true,"result":{body}}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let (handle, mut out_rx, pending) = make_handle(8, Duration::from_secs(1));
        let subscriptions = Arc::new(SubscriptionManager::new());

        let responder = tokio::spawn({
            let pending = pending.clone();
            let subscriptions = subscriptions.clone();
            async move {
                if let Some(Message::Text(text)) = out_rx.recv().await {
                    let sent: Value = serde_json::from_str(&text).unwrap();
                    assert_eq!(sent["type"], "subscribe_events");
                    let id = sent["id"].as_u64().unwrap();
                    route_frame(respond(id, r#"{"ok":true}"#), &pending, &subscriptions).await;
                }
            }
        });

        let (id, result): (u64, Value) = handle
            .request(|id| ClientFrame::SubscribeEvents {
                id,
                event_type: "state_changed".to_owned(),
            })
            .await
            .unwrap();

        assert_eq!(id, 1);
        assert_eq!(result["ok"], true);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_remote_error() {
        let (handle, mut out_rx, pending) = make_handle(8, Duration::from_secs(1));
        let subscriptions = Arc::new(SubscriptionManager::new());

        let responder = tokio::spawn({
            let pending = pending.clone();
            let subscriptions = subscriptions.clone();
            async move {
                if let Some(Message::Text(text)) = out_rx.recv().await {
                    let sent: Value = serde_json::from_str(&text).unwrap();
                    let id = sent["id"].as_u64().unwrap();
                    let error = frame::decode(&format!(
                        r#"{{"id":{id},"type":"result","success":false,"error":{{"code":"no","message":"denied"}}}}"#
                    ))
                    .unwrap();
                    route_frame(error, &pending, &subscriptions).await;
                }
            }
        });

        let result = handle
            .request::<Value, _>(|id| ClientFrame::Ping { id })
            .await;

        match result {
            Err(RequestError::Remote(detail)) => assert!(detail.contains("denied")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_timeout_cleans_pending() {
        let (handle, _out_rx, pending) = make_handle(8, Duration::from_millis(20));

        let result = handle
            .request::<Value, _>(|id| ClientFrame::Ping { id })
            .await;

        assert!(matches!(result, Err(RequestError::Timeout(_))));
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_result_is_ignored() {
        let (handle, mut out_rx, pending) = make_handle(8, Duration::from_secs(1));
        let subscriptions = Arc::new(SubscriptionManager::new());

        let responder = tokio::spawn({
            let pending = pending.clone();
            let subscriptions = subscriptions.clone();
            async move {
                if let Some(Message::Text(text)) = out_rx.recv().await {
                    let sent: Value = serde_json::from_str(&text).unwrap();
                    let id = sent["id"].as_u64().unwrap();
                    route_frame(respond(id, "1"), &pending, &subscriptions).await;
                    // Second result with the same id: logged and dropped.
                    route_frame(respond(id, "2"), &pending, &subscriptions).await;
                }
            }
        });

        let (_, result): (u64, Value) = handle
            .request(|id| ClientFrame::Ping { id })
            .await
            .unwrap();

        assert_eq!(result, Value::from(1));
        responder.await.unwrap();
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_notify_pending_fails_waiters() {
        let (handle, _out_rx, pending) = make_handle(8, Duration::from_secs(5));

        let request = tokio::spawn({
            let handle = handle.clone();
            async move { handle.request::<Value, _>(|id| ClientFrame::Ping { id }).await }
        });

        // Wait for the request to register itself, then kill the session.
        while pending.lock().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        notify_pending(&pending).await;

        let result = request.await.unwrap();
        assert!(matches!(result, Err(RequestError::SessionClosed)));
    }
}
