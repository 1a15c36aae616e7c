use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Remembers the last observed state transition per entity.
///
/// Process-scoped: survives session reconnects, not restarts. Only actual
/// transitions move the clock; repeated reports of the same state neither
/// yield a duration nor reset the transition instant.
#[derive(Debug, Default)]
pub struct DurationTracker {
    transitions: DashMap<String, Transition>,
}

#[derive(Debug, Clone)]
struct Transition {
    state: String,
    at: DateTime<Utc>,
}

impl DurationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a transition and returns the seconds the entity spent in its
    /// previous state, when a previous transition was seen in this process.
    ///
    /// Returns `None` for non-transitions, first sightings, and out-of-order
    /// timestamps (a negative duration would be a lie).
    pub fn observe(
        &self,
        entity_id: &str,
        state: &str,
        state_changed: bool,
        at: DateTime<Utc>,
    ) -> Option<f64> {
        if !state_changed {
            return None;
        }

        let previous = self.transitions.insert(
            entity_id.to_owned(),
            Transition {
                state: state.to_owned(),
                at,
            },
        )?;

        let seconds = (at - previous.at).num_milliseconds() as f64 / 1_000.0;
        (seconds >= 0.0).then_some(seconds)
    }

    /// State recorded by the last observed transition, if any.
    #[must_use]
    pub fn last_state(&self, entity_id: &str) -> Option<String> {
        self.transitions.get(entity_id).map(|t| t.state.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}
