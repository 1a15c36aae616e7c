use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    libs::hub_client::{frame::ClientFrame, models::RawEvent},
    services::collector::session::{RequestError, SessionHandle},
};

/// Tracks active event subscriptions and maps incoming event frames to the
/// handler channel of the subscription they belong to.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    inner: Mutex<HashMap<u64, Subscription>>,
}

#[derive(Debug)]
struct Subscription {
    event_type: String,
    events_tx: mpsc::Sender<RawEvent>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `subscribe_events` and registers the handler under the returned
    /// correlation id; every subsequent event frame carrying that id goes to
    /// `events_tx` until cancelled.
    pub async fn subscribe(
        &self,
        handle: &SessionHandle,
        event_type: &str,
        events_tx: mpsc::Sender<RawEvent>,
    ) -> Result<u64, RequestError> {
        let (id, _ack) = handle
            .request::<serde_json::Value, _>(|id| ClientFrame::SubscribeEvents {
                id,
                event_type: event_type.to_owned(),
            })
            .await?;

        self.register(id, event_type, events_tx);
        Ok(id)
    }

    /// Cancels server-side, then forgets the subscription.
    pub async fn unsubscribe(
        &self,
        handle: &SessionHandle,
        subscription_id: u64,
    ) -> Result<(), RequestError> {
        handle
            .request::<serde_json::Value, _>(|id| ClientFrame::UnsubscribeEvents {
                id,
                subscription: subscription_id,
            })
            .await?;

        self.cancel(subscription_id);
        Ok(())
    }

    pub(crate) fn register(&self, id: u64, event_type: &str, events_tx: mpsc::Sender<RawEvent>) {
        let replaced = self.inner.lock().insert(
            id,
            Subscription {
                event_type: event_type.to_owned(),
                events_tx,
            },
        );

        if replaced.is_some() {
            debug!(id, "subscription id reused, replacing handler");
        }
    }

    /// Forgets a subscription locally. Returns whether it existed.
    pub fn cancel(&self, id: u64) -> bool {
        self.inner.lock().remove(&id).is_some()
    }

    /// Hands an event frame to its subscription's handler channel, applying
    /// that channel's backpressure. Returns false for unknown ids.
    pub async fn dispatch(&self, id: u64, event: RawEvent) -> bool {
        let events_tx = self.inner.lock().get(&id).map(|s| s.events_tx.clone());

        match events_tx {
            Some(events_tx) => events_tx.send(event).await.is_ok(),
            None => false,
        }
    }

    #[must_use]
    pub fn ids(&self) -> Vec<u64> {
        self.inner.lock().keys().copied().collect()
    }

    #[must_use]
    pub fn event_type(&self, id: u64) -> Option<String> {
        self.inner.lock().get(&id).map(|s| s.event_type.clone())
    }
}
