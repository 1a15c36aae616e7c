//! Registry discovery: one run per session.
//!
//! Lists the device and entity registries over the session, pushes both to
//! the metadata collaborator, and refreshes the registry cache. Hub-side
//! failures reschedule the whole run; collaborator failures do not, the
//! freshly built cache stays authoritative either way.

use std::{sync::Arc, time::Duration};

use engine::METRICS;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    libs::{
        hub_client::{
            frame::ClientFrame,
            models::{DeviceEntry, EntityEntry},
        },
        metadata::{DevicePayload, EntityPayload, MetadataClient},
    },
    services::collector::{
        registry::{self, RegistryCache},
        session::{RequestError, SessionHandle},
    },
};

pub struct DiscoveryTask {
    handle: SessionHandle,
    metadata: MetadataClient,
    registry: Arc<RegistryCache>,
    rpc_timeout: Duration,
    list_retry_delays: Vec<Duration>,
    reschedule_delay: Duration,
}

impl DiscoveryTask {
    #[must_use]
    pub fn new(
        handle: SessionHandle,
        metadata: MetadataClient,
        registry: Arc<RegistryCache>,
    ) -> Self {
        Self {
            handle,
            metadata,
            registry,
            rpc_timeout: Duration::from_secs(30),
            list_retry_delays: vec![Duration::from_secs(2), Duration::from_secs(4)],
            reschedule_delay: Duration::from_secs(300),
        }
    }

    /// Overrides the timing knobs (tests use millisecond delays).
    #[must_use]
    pub fn with_timing(
        mut self,
        rpc_timeout: Duration,
        list_retry_delays: Vec<Duration>,
        reschedule_delay: Duration,
    ) -> Self {
        self.rpc_timeout = rpc_timeout;
        self.list_retry_delays = list_retry_delays;
        self.reschedule_delay = reschedule_delay;
        self
    }

    /// Runs until discovery succeeds once or the session is cancelled.
    pub async fn run(self, token: CancellationToken) {
        loop {
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                outcome = self.discover_once() => outcome,
            };

            match outcome {
                Ok((devices, entities)) => {
                    info!(devices, entities, "registry discovery completed");
                    METRICS.record_discovery_run("ok");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "registry discovery failed, rescheduling");
                    METRICS.record_discovery_run("hub_error");
                    tokio::select! {
                        _ = token.cancelled() => return,
                        () = tokio::time::sleep(self.reschedule_delay) => {}
                    }
                }
            }
        }
    }

    async fn discover_once(&self) -> Result<(usize, usize), RequestError> {
        let devices: Vec<DeviceEntry> = self
            .list_with_retry(|id| ClientFrame::DeviceRegistryList { id })
            .await?;
        let entities: Vec<EntityEntry> = self
            .list_with_retry(|id| ClientFrame::EntityRegistryList { id })
            .await?;

        // The cache is authoritative as soon as both listings land; it does
        // not wait on the collaborator.
        self.registry
            .replace(registry::build_links(&entities, &devices));

        if let Err(e) = self
            .metadata
            .upsert_devices(&build_device_payloads(&devices))
            .await
        {
            warn!(error = %e, "device bulk upsert failed");
            METRICS.record_discovery_run("upsert_error");
        }
        if let Err(e) = self
            .metadata
            .upsert_entities(&build_entity_payloads(&entities))
            .await
        {
            warn!(error = %e, "entity bulk upsert failed");
            METRICS.record_discovery_run("upsert_error");
        }

        Ok((devices.len(), entities.len()))
    }

    /// Registry listing with the short in-session retry ladder.
    async fn list_with_retry<R: DeserializeOwned>(
        &self,
        make: impl Fn(u64) -> ClientFrame + Send + Sync,
    ) -> Result<R, RequestError> {
        let mut attempt = 0;

        loop {
            match self
                .handle
                .request_with_timeout(|id| make(id), self.rpc_timeout)
                .await
            {
                Ok((_, value)) => return Ok(value),
                Err(e) => {
                    if attempt >= self.list_retry_delays.len() {
                        return Err(e);
                    }
                    let delay = self.list_retry_delays[attempt];
                    warn!(error = %e, attempt, "registry listing failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Sorted by device id so identical hub state yields identical payloads.
pub(crate) fn build_device_payloads(devices: &[DeviceEntry]) -> Vec<DevicePayload> {
    let mut payloads: Vec<_> = devices.iter().map(DevicePayload::from).collect();
    payloads.sort_by(|a, b| a.id.cmp(&b.id));
    payloads
}

/// Sorted by entity id, same reasoning.
pub(crate) fn build_entity_payloads(entities: &[EntityEntry]) -> Vec<EntityPayload> {
    let mut payloads: Vec<_> = entities.iter().map(EntityPayload::from).collect();
    payloads.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    payloads
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn devices() -> Vec<DeviceEntry> {
        serde_json::from_value(json!([
            {"id": "d2", "name": "Thermostat", "area_id": "hall"},
            {"id": "d1", "name": "Hue Bridge", "identifiers": [["hue", "x"]]}
        ]))
        .unwrap()
    }

    fn entities() -> Vec<EntityEntry> {
        serde_json::from_value(json!([
            {"entity_id": "sensor.hall_temp", "device_id": "d2"},
            {"entity_id": "light.bedroom", "device_id": "d1"}
        ]))
        .unwrap()
    }

    #[test]
    fn test_device_payloads_are_deterministic() {
        let forward = build_device_payloads(&devices());
        let mut reversed_input = devices();
        reversed_input.reverse();
        let reversed = build_device_payloads(&reversed_input);

        assert_eq!(forward, reversed);
        assert_eq!(forward[0].id, "d1");
        assert_eq!(forward[0].integration.as_deref(), Some("hue"));
    }

    #[test]
    fn test_entity_payloads_are_deterministic() {
        let forward = build_entity_payloads(&entities());
        let mut reversed_input = entities();
        reversed_input.reverse();
        let reversed = build_entity_payloads(&reversed_input);

        assert_eq!(forward, reversed);
        assert_eq!(forward[0].entity_id, "light.bedroom");
        assert_eq!(forward[1].domain.as_deref(), Some("sensor"));
    }
}
