//! Turns raw state-change envelopes into flat normalized records.
//!
//! Validation failures never escape the event handler; each failure maps to
//! a counted rejection reason. Lookups against the registry cache and the
//! duration tracker are O(1) and never block on I/O.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};

use crate::{
    libs::hub_client::models::RawEvent,
    services::{
        collector::{duration::DurationTracker, registry::RegistryCache},
        writer::record::NormalizedRecord,
    },
};

/// State value used when a side of the transition is absent.
const UNKNOWN_STATE: &str = "unknown";

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("entity id {0:?} is not of the form domain.object")]
    InvalidEntityId(String),
    #[error("event carries neither new_state nor old_state")]
    MissingState,
    #[error("timestamp {timestamp} is {delta_secs}s away from receive time")]
    TimestampOutOfRange {
        timestamp: DateTime<Utc>,
        delta_secs: i64,
    },
    #[error("event envelope mismatch: {0}")]
    SchemaMismatch(String),
}

impl NormalizeError {
    /// Stable label for the rejection counter.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidEntityId(_) => "invalid_entity_id",
            Self::MissingState => "missing_state",
            Self::TimestampOutOfRange { .. } => "timestamp_out_of_range",
            Self::SchemaMismatch(_) => "schema_mismatch",
        }
    }
}

/// Stateless transformation plus the two in-memory lookups it consults.
pub struct Normalizer {
    registry: Arc<RegistryCache>,
    durations: Arc<DurationTracker>,
    max_clock_skew: TimeDelta,
}

impl Normalizer {
    #[must_use]
    pub fn new(
        registry: Arc<RegistryCache>,
        durations: Arc<DurationTracker>,
        max_clock_skew: Duration,
    ) -> Self {
        Self {
            registry,
            durations,
            max_clock_skew: TimeDelta::from_std(max_clock_skew).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Produces exactly one record per accepted event.
    pub fn normalize(
        &self,
        event: &RawEvent,
        received_at: DateTime<Utc>,
    ) -> Result<NormalizedRecord, NormalizeError> {
        if event.event_type != "state_changed" {
            return Err(NormalizeError::SchemaMismatch(format!(
                "unexpected event type {:?}",
                event.event_type
            )));
        }

        let data = &event.data;

        let entity_id = data.entity_id.as_deref().unwrap_or_default();
        let (domain, object_id) = entity_id
            .split_once('.')
            .ok_or_else(|| NormalizeError::InvalidEntityId(entity_id.to_owned()))?;
        if domain.is_empty() || object_id.is_empty() || object_id.contains('.') {
            return Err(NormalizeError::InvalidEntityId(entity_id.to_owned()));
        }

        if data.new_state.is_none() && data.old_state.is_none() {
            return Err(NormalizeError::MissingState);
        }

        // time_fired is authoritative; receive time is the documented fallback.
        let timestamp = event
            .time_fired
            .as_deref()
            .and_then(parse_rfc3339)
            .unwrap_or(received_at);

        let skew = (timestamp - received_at).abs();
        if skew > self.max_clock_skew || timestamp.timestamp_millis() == 0 {
            return Err(NormalizeError::TimestampOutOfRange {
                timestamp,
                delta_secs: skew.num_seconds(),
            });
        }

        let state = data
            .new_state
            .as_ref()
            .map_or(UNKNOWN_STATE, |s| s.state.as_str());
        let previous_state = data
            .old_state
            .as_ref()
            .map_or(UNKNOWN_STATE, |s| s.state.as_str());
        let state_changed = state != previous_state;

        let duration_in_state =
            self.durations
                .observe(entity_id, state, state_changed, timestamp);

        let link = self.registry.lookup(entity_id).unwrap_or_default();

        let attributes = data.new_state.as_ref().map(|s| &s.attributes);
        let context = event.context.clone().unwrap_or_default();

        Ok(NormalizedRecord {
            timestamp,
            entity_id: entity_id.to_owned(),
            domain: domain.to_owned(),
            state: state.to_owned(),
            previous_state: previous_state.to_owned(),
            state_changed,
            duration_in_state,
            context_id: context.id,
            context_parent_id: context.parent_id,
            context_user_id: context.user_id,
            device_id: link.device_id,
            area_id: link.area_id,
            friendly_name: whitelisted_attr(attributes, "friendly_name"),
            unit_of_measurement: whitelisted_attr(attributes, "unit_of_measurement"),
            device_class: whitelisted_attr(attributes, "device_class"),
            numeric_state: coerce_numeric(state),
        })
    }
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Only the whitelisted attribute keys ever reach their columns, and only
/// as strings; everything else in the attribute map is ignored.
fn whitelisted_attr(attributes: Option<&Map<String, Value>>, key: &str) -> Option<String> {
    attributes?.get(key)?.as_str().map(str::to_owned)
}

fn coerce_numeric(state: &str) -> Option<f64> {
    state.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
