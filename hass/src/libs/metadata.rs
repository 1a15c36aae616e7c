//! Metadata collaborator client.
//!
//! Pushes registry snapshots as bulk upserts. The collaborator never calls
//! back into this service; failures are retried with backoff and otherwise
//! only logged, the registry cache stays authoritative either way.

use std::time::Duration;

use engine::Backoff;
use serde::Serialize;
use serde_json::json;
use serde_with::skip_serializing_none;
use tracing::warn;

use crate::libs::hub_client::models::{DeviceEntry, EntityEntry};

const UPSERT_ATTEMPTS: u32 = 4;

/// Device payload for `POST /internal/devices/bulk_upsert`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DevicePayload {
    pub id: String,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    pub area_id: Option<String>,
    pub integration: Option<String>,
}

impl From<&DeviceEntry> for DevicePayload {
    fn from(device: &DeviceEntry) -> Self {
        Self {
            id: device.id.clone(),
            name: device.display_name().map(str::to_owned),
            manufacturer: device.manufacturer.clone(),
            model: device.model.clone(),
            sw_version: device.sw_version.clone(),
            area_id: device.area_id.clone(),
            integration: device.integration().map(str::to_owned),
        }
    }
}

/// Entity payload for `POST /internal/entities/bulk_upsert`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EntityPayload {
    pub entity_id: String,
    pub device_id: Option<String>,
    pub domain: Option<String>,
    pub platform: Option<String>,
    pub unique_id: Option<String>,
    pub area_id: Option<String>,
    pub disabled: bool,
}

impl From<&EntityEntry> for EntityPayload {
    fn from(entity: &EntityEntry) -> Self {
        Self {
            entity_id: entity.entity_id.clone(),
            device_id: entity.device_id.clone(),
            domain: entity.domain().map(str::to_owned),
            platform: entity.platform.clone(),
            unique_id: entity.unique_id.clone(),
            area_id: entity.area_id.clone(),
            disabled: entity.disabled_by.is_some(),
        }
    }
}

/// HTTP client for the metadata collaborator's bulk upsert endpoints.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
    backoff: Backoff,
}

impl MetadataClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(8)),
        })
    }

    /// Overrides the retry backoff (tests use millisecond delays).
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn upsert_devices(&self, devices: &[DevicePayload]) -> anyhow::Result<()> {
        self.post_bulk(
            "/internal/devices/bulk_upsert",
            json!({ "devices": devices }),
        )
        .await
    }

    pub async fn upsert_entities(&self, entities: &[EntityPayload]) -> anyhow::Result<()> {
        self.post_bulk(
            "/internal/entities/bulk_upsert",
            json!({ "entities": entities }),
        )
        .await
    }

    async fn post_bulk(&self, path: &str, body: serde_json::Value) -> anyhow::Result<()> {
        let url = format!("{}{path}", self.base_url);

        for attempt in 1..=UPSERT_ATTEMPTS {
            let result = self.http.post(&url).json(&body).send().await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    warn!(
                        url = %url,
                        status = response.status().as_u16(),
                        attempt,
                        "metadata upsert rejected"
                    );
                }
                Err(e) => {
                    warn!(url = %url, error = %e, attempt, "metadata upsert failed");
                }
            }

            if attempt < UPSERT_ATTEMPTS {
                tokio::time::sleep(self.backoff.delay(attempt)).await;
            }
        }

        anyhow::bail!("metadata upsert to {url} failed after {UPSERT_ATTEMPTS} attempts")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fast_client(server: &mockito::ServerGuard) -> MetadataClient {
        MetadataClient::new(&server.url())
            .unwrap()
            .with_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(2)))
    }

    #[tokio::test]
    async fn test_upsert_devices_payload_shape() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/internal/devices/bulk_upsert")
            .match_body(mockito::Matcher::Json(json!({
                "devices": [{
                    "id": "d1",
                    "name": "Hue Bridge",
                    "manufacturer": "Signify",
                    "integration": "hue"
                }]
            })))
            .with_status(200)
            .create_async()
            .await;

        let device: DeviceEntry = serde_json::from_value(json!({
            "id": "d1",
            "name": "Hue Bridge",
            "manufacturer": "Signify",
            "identifiers": [["hue", "xyz"]]
        }))
        .unwrap();

        let client = fast_client(&server);
        client
            .upsert_devices(&[DevicePayload::from(&device)])
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upsert_entities_marks_disabled() {
        let entity: EntityEntry = serde_json::from_value(json!({
            "entity_id": "light.bedroom",
            "device_id": "d1",
            "platform": "hue",
            "disabled_by": "user"
        }))
        .unwrap();

        let payload = EntityPayload::from(&entity);
        assert!(payload.disabled);
        assert_eq!(payload.domain.as_deref(), Some("light"));
    }

    #[tokio::test]
    async fn test_upsert_retries_then_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/internal/entities/bulk_upsert")
            .with_status(500)
            .expect(4)
            .create_async()
            .await;

        let client = fast_client(&server);
        let result = client.upsert_entities(&[]).await;

        assert!(result.is_err());
        mock.assert_async().await;
    }
}
