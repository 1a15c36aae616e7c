use std::path::Path;

use serde::Deserialize;
use tools::toml;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub hass: hass::Config,

    #[serde(default)]
    pub general: GeneralConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub server_addr: String,
    pub metrics_addr: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9000".to_owned(),
            metrics_addr: "127.0.0.1:9007".to_owned(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        toml::parse_file::<Self>(path)?.validate()
    }

    pub fn validate(mut self) -> anyhow::Result<Self> {
        use engine::Validatable;

        self.hass.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [general]
        server_addr = "0.0.0.0:9000"
        metrics_addr = "0.0.0.0:9007"

        [hass]
        hub_url = "ws://hub:8123/api/websocket"
        hub_token = "TOKEN"
        metadata_url = "http://metadata:8080"
        store_url = "http://influx:8086/api/v2/write?bucket=events"
        store_token = "secret"
    "#;

    #[test]
    fn test_parse_and_validate() {
        let config: Config = ::toml::from_str(SAMPLE).unwrap();
        let config = config.validate().unwrap();

        assert_eq!(config.general.server_addr, "0.0.0.0:9000");
        assert_eq!(config.hass.batch_size, 100);
    }

    #[test]
    fn test_general_defaults_when_absent() {
        let trimmed = SAMPLE.replace("[general]", "[unused]");
        let config: Config = ::toml::from_str(&trimmed).unwrap();

        assert_eq!(config.general.server_addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_invalid_hub_config_fails_validation() {
        let broken = SAMPLE.replace("TOKEN", " ");
        let config: Config = ::toml::from_str(&broken).unwrap();

        assert!(config.validate().is_err());
    }
}
