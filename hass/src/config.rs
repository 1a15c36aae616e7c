use anyhow::bail;
use engine::Validatable;
use serde::Deserialize;
use url::Url;

/// Hub ingestion settings.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// WebSocket URL of the hub, e.g. `ws://hub:8123/api/websocket`.
    pub hub_url: String,
    /// Long-lived access token used in the auth handshake.
    pub hub_token: String,
    /// Session reconnect attempts; negative means retry forever.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    /// Cap for the reconnect exponential backoff, in seconds.
    #[serde(default = "default_max_retry_delay_sec")]
    pub max_retry_delay_sec: u64,
    /// Records per flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Deadline flush interval, in seconds.
    #[serde(default = "default_batch_timeout_sec")]
    pub batch_timeout_sec: u64,
    /// Hard cap on buffered records.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Backpressure threshold.
    #[serde(default = "default_buffer_high_water")]
    pub buffer_high_water: usize,
    /// Events outside this skew from receive time are rejected, in seconds.
    #[serde(default = "default_max_clock_skew_sec")]
    pub max_clock_skew_sec: u64,
    /// Application-level ping cadence, in seconds.
    #[serde(default = "default_ping_interval_sec")]
    pub ping_interval_sec: u64,
    /// Force-close the session after this long without any frame, in seconds.
    #[serde(default = "default_silence_timeout_sec")]
    pub silence_timeout_sec: u64,
    /// Base URL of the metadata collaborator.
    pub metadata_url: String,
    /// Complete write endpoint of the time-series store.
    pub store_url: String,
    /// Credential for the time-series store.
    pub store_token: String,
    /// Target measurement for normalized records.
    #[serde(default = "default_measurement")]
    pub measurement: String,
}

fn default_max_retries() -> i64 {
    -1
}

fn default_max_retry_delay_sec() -> u64 {
    300
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_sec() -> u64 {
    5
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_buffer_high_water() -> usize {
    7_500
}

fn default_max_clock_skew_sec() -> u64 {
    86_400
}

fn default_ping_interval_sec() -> u64 {
    30
}

fn default_silence_timeout_sec() -> u64 {
    90
}

fn default_measurement() -> String {
    "state_history".to_owned()
}

impl Validatable for Config {
    fn validate(&mut self) -> anyhow::Result<()> {
        if self.hub_token.trim().is_empty() {
            bail!("hub_token must not be empty");
        }

        let url = Url::parse(&self.hub_url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("hub_url must be a ws:// or wss:// URL: {}", self.hub_url);
        }

        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.buffer_high_water >= self.buffer_capacity {
            bail!(
                "buffer_high_water ({}) must be below buffer_capacity ({})",
                self.buffer_high_water,
                self.buffer_capacity
            );
        }
        if self.batch_size > self.buffer_capacity {
            bail!(
                "batch_size ({}) must not exceed buffer_capacity ({})",
                self.batch_size,
                self.buffer_capacity
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        toml::from_str(
            r#"
            hub_url = "ws://hub:8123/api/websocket"
            hub_token = "TOKEN"
            metadata_url = "http://metadata:8080"
            store_url = "http://influx:8086/api/v2/write?bucket=events"
            store_token = "secret"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = sample();

        assert_eq!(config.max_retries, -1);
        assert_eq!(config.max_retry_delay_sec, 300);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.batch_timeout_sec, 5);
        assert_eq!(config.buffer_capacity, 10_000);
        assert_eq!(config.buffer_high_water, 7_500);
        assert_eq!(config.max_clock_skew_sec, 86_400);
        assert_eq!(config.ping_interval_sec, 30);
        assert_eq!(config.silence_timeout_sec, 90);
        assert_eq!(config.measurement, "state_history");
    }

    #[test]
    fn test_validate_ok() {
        let mut config = sample();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_token() {
        let mut config = sample();
        config.hub_token = "  ".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_http_hub_url() {
        let mut config = sample();
        config.hub_url = "http://hub:8123".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_watermarks() {
        let mut config = sample();
        config.buffer_high_water = config.buffer_capacity;
        assert!(config.validate().is_err());
    }
}
