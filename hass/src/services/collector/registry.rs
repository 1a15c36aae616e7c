use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::libs::hub_client::models::{DeviceEntry, EntityEntry};

/// Spatial tags for one entity, resolved from the registries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityLink {
    pub device_id: Option<String>,
    pub area_id: Option<String>,
}

type Links = HashMap<String, EntityLink>;

/// Process-scoped snapshot of entity → (device, area) links.
///
/// Discovery replaces the whole snapshot atomically; readers keep working
/// against the reference they grabbed, so a lookup never observes a
/// half-built map.
#[derive(Debug, Default)]
pub struct RegistryCache {
    links: RwLock<Arc<Links>>,
}

impl RegistryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lookup(&self, entity_id: &str) -> Option<EntityLink> {
        self.links.read().get(entity_id).cloned()
    }

    /// Publishes a freshly built snapshot.
    pub fn replace(&self, links: Links) {
        *self.links.write() = Arc::new(links);
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Links> {
        Arc::clone(&self.links.read())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.read().is_empty()
    }
}

/// Builds the link map from registry listings.
///
/// An entity without its own area inherits the area of its device, matching
/// how the hub resolves placement.
#[must_use]
pub fn build_links(entities: &[EntityEntry], devices: &[DeviceEntry]) -> Links {
    let device_areas: HashMap<&str, Option<&str>> = devices
        .iter()
        .map(|d| (d.id.as_str(), d.area_id.as_deref()))
        .collect();

    entities
        .iter()
        .map(|entity| {
            let area_id = entity.area_id.clone().or_else(|| {
                entity
                    .device_id
                    .as_deref()
                    .and_then(|id| device_areas.get(id).copied().flatten())
                    .map(str::to_owned)
            });

            (
                entity.entity_id.clone(),
                EntityLink {
                    device_id: entity.device_id.clone(),
                    area_id,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fixtures() -> (Vec<EntityEntry>, Vec<DeviceEntry>) {
        let entities: Vec<EntityEntry> = serde_json::from_value(json!([
            {"entity_id": "light.bedroom", "device_id": "d1"},
            {"entity_id": "sensor.porch", "device_id": "d2", "area_id": "porch"},
            {"entity_id": "script.morning"}
        ]))
        .unwrap();

        let devices: Vec<DeviceEntry> = serde_json::from_value(json!([
            {"id": "d1", "area_id": "bedroom"},
            {"id": "d2", "area_id": "garden"}
        ]))
        .unwrap();

        (entities, devices)
    }

    #[test]
    fn test_entity_inherits_device_area() {
        let (entities, devices) = fixtures();
        let links = build_links(&entities, &devices);

        let link = &links["light.bedroom"];
        assert_eq!(link.device_id.as_deref(), Some("d1"));
        assert_eq!(link.area_id.as_deref(), Some("bedroom"));
    }

    #[test]
    fn test_own_area_wins_over_device_area() {
        let (entities, devices) = fixtures();
        let links = build_links(&entities, &devices);

        assert_eq!(links["sensor.porch"].area_id.as_deref(), Some("porch"));
    }

    #[test]
    fn test_entity_without_device_has_no_tags() {
        let (entities, devices) = fixtures();
        let links = build_links(&entities, &devices);

        assert_eq!(links["script.morning"], EntityLink::default());
    }

    #[test]
    fn test_replace_is_atomic_for_readers() {
        let cache = RegistryCache::new();
        let (entities, devices) = fixtures();
        cache.replace(build_links(&entities, &devices));

        let before = cache.snapshot();
        cache.replace(HashMap::new());

        // The old snapshot stays consistent; new lookups see the new map.
        assert_eq!(before.len(), 3);
        assert!(cache.is_empty());
        assert_eq!(cache.lookup("light.bedroom"), None);
    }
}
