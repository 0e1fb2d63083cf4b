use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::Result;
use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub mixer: MixerConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Read a TOML file. Missing sections fall back to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|source| {
            crate::common::Error::Open {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.mixer, MixerConfig::default());
        assert_eq!(config.mixer.idle_backoff_ms, 10);
        assert_eq!(config.mixer.output_bit_rate, 128_000);
        assert!(config.logging.is_none());
    }

    #[test]
    fn partial_mixer_section() {
        let config = Config::from_toml_str(
            r#"
            [mixer]
            idle_backoff_ms = 25
            conform_external_audio = false

            [logging]
            level = "debug"
            file = { path = "logs/dubmix.log" }
            "#,
        )
        .unwrap();

        assert_eq!(config.mixer.idle_backoff_ms, 25);
        assert!(!config.mixer.conform_external_audio);
        assert_eq!(config.mixer.aac_profile, 39);
        let logging = config.logging.unwrap();
        assert_eq!(logging.level.as_deref(), Some("debug"));
        assert_eq!(logging.file.unwrap().max_lines, 10_000);
    }

    #[test]
    fn rejects_bad_types() {
        assert!(Config::from_toml_str("[mixer]\nidle_backoff_ms = \"soon\"").is_err());
    }
}
