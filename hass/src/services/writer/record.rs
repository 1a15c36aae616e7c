//! Flat persisted form of a state-change event.

use chrono::{DateTime, Utc};

/// One normalized record, ready for the time-series store.
///
/// Tag columns index low-cardinality dimensions; everything else rides in
/// field columns. Optional columns are simply absent from the rendered line.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    pub domain: String,
    pub state: String,
    pub previous_state: String,
    pub state_changed: bool,
    pub duration_in_state: Option<f64>,
    pub context_id: Option<String>,
    pub context_parent_id: Option<String>,
    pub context_user_id: Option<String>,
    pub device_id: Option<String>,
    pub area_id: Option<String>,
    pub friendly_name: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub device_class: Option<String>,
    pub numeric_state: Option<f64>,
}

impl NormalizedRecord {
    /// Renders the record as a single line of line protocol with a
    /// nanosecond timestamp.
    #[must_use]
    pub fn to_line_protocol(&self, measurement: &str) -> String {
        let mut line = escape_measurement(measurement);

        for (key, value) in self.tags() {
            if let Some(value) = value
                && !value.is_empty()
            {
                line.push(',');
                line.push_str(key);
                line.push('=');
                line.push_str(&escape_tag(value));
            }
        }

        line.push_str(" state=\"");
        line.push_str(&escape_field_string(&self.state));
        line.push_str("\",state_changed=");
        line.push_str(if self.state_changed { "true" } else { "false" });

        if let Some(duration) = self.duration_in_state {
            line.push_str(",duration_in_state=");
            line.push_str(&duration.to_string());
        }
        if let Some(ref friendly_name) = self.friendly_name {
            line.push_str(",friendly_name=\"");
            line.push_str(&escape_field_string(friendly_name));
            line.push('"');
        }
        if let Some(numeric_state) = self.numeric_state {
            line.push_str(",numeric_state=");
            line.push_str(&numeric_state.to_string());
        }

        line.push(' ');
        line.push_str(&self.timestamp_nanos().to_string());
        line
    }

    /// Tag columns in lexical key order. Only whitelisted dimensions ever
    /// become tags; arbitrary attributes never get promoted.
    fn tags(&self) -> [(&'static str, Option<&str>); 10] {
        [
            ("area_id", self.area_id.as_deref()),
            ("context_id", self.context_id.as_deref()),
            ("context_parent_id", self.context_parent_id.as_deref()),
            ("context_user_id", self.context_user_id.as_deref()),
            ("device_class", self.device_class.as_deref()),
            ("device_id", self.device_id.as_deref()),
            ("domain", Some(&self.domain)),
            ("entity_id", Some(&self.entity_id)),
            ("previous_state", Some(&self.previous_state)),
            ("unit_of_measurement", self.unit_of_measurement.as_deref()),
        ]
    }

    fn timestamp_nanos(&self) -> i64 {
        self.timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_millis().saturating_mul(1_000_000))
    }
}

fn escape_measurement(value: &str) -> String {
    escape(value, &[',', ' '])
}

fn escape_tag(value: &str) -> String {
    escape(value, &[',', '=', ' '])
}

fn escape_field_string(value: &str) -> String {
    escape(value, &['"', '\\'])
}

fn escape(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn minimal(entity_id: &str, state: &str) -> NormalizedRecord {
        let (domain, _) = entity_id.split_once('.').unwrap();
        NormalizedRecord {
            timestamp: "2025-01-01T00:00:00Z".parse().unwrap(),
            entity_id: entity_id.to_owned(),
            domain: domain.to_owned(),
            state: state.to_owned(),
            previous_state: "unknown".to_owned(),
            state_changed: true,
            duration_in_state: None,
            context_id: None,
            context_parent_id: None,
            context_user_id: None,
            device_id: None,
            area_id: None,
            friendly_name: None,
            unit_of_measurement: None,
            device_class: None,
            numeric_state: None,
        }
    }

    #[test]
    fn test_minimal_line() {
        let record = minimal("light.bedroom", "on");
        assert_eq!(
            record.to_line_protocol("state_history"),
            "state_history,domain=light,entity_id=light.bedroom,previous_state=unknown \
             state=\"on\",state_changed=true 1735689600000000000"
        );
    }

    #[test]
    fn test_full_line_with_optional_columns() {
        let mut record = minimal("sensor.kitchen_temp", "21.5");
        record.previous_state = "21.0".to_owned();
        record.duration_in_state = Some(30.0);
        record.context_id = Some("c1".to_owned());
        record.device_id = Some("d1".to_owned());
        record.area_id = Some("kitchen".to_owned());
        record.friendly_name = Some("Kitchen Temp".to_owned());
        record.unit_of_measurement = Some("°C".to_owned());
        record.device_class = Some("temperature".to_owned());
        record.numeric_state = Some(21.5);

        assert_eq!(
            record.to_line_protocol("state_history"),
            "state_history,area_id=kitchen,context_id=c1,device_class=temperature,device_id=d1,\
             domain=sensor,entity_id=sensor.kitchen_temp,previous_state=21.0,\
             unit_of_measurement=°C state=\"21.5\",state_changed=true,duration_in_state=30,\
             friendly_name=\"Kitchen Temp\",numeric_state=21.5 1735689600000000000"
        );
    }

    #[test]
    fn test_tag_escaping() {
        let mut record = minimal("light.bedroom", "on");
        record.area_id = Some("living room, 1st=floor".to_owned());

        let line = record.to_line_protocol("state_history");
        assert!(line.contains("area_id=living\\ room\\,\\ 1st\\=floor"));
    }

    #[test]
    fn test_string_field_escaping() {
        let mut record = minimal("light.bedroom", "on");
        record.friendly_name = Some(r#"Bed "main" \ lamp"#.to_owned());

        let line = record.to_line_protocol("state_history");
        assert!(line.contains(r#"friendly_name="Bed \"main\" \\ lamp""#));
    }

    #[test]
    fn test_measurement_escaping() {
        let record = minimal("light.bedroom", "on");
        let line = record.to_line_protocol("state history");
        assert!(line.starts_with("state\\ history,"));
    }
}
