//! Configuration file support for the tempo CLI tools

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Parameters of the in-memory lossy exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateConfig {
    /// Number of frames to carry end to end.
    #[serde(default = "default_frames")]
    pub frames: u32,
    /// Every Nth data packet is dropped (0 disables loss).
    #[serde(default = "default_data_drop_interval")]
    pub data_drop_interval: u64,
    /// Every Nth acknowledgment packet is dropped (0 disables loss).
    #[serde(default = "default_ack_drop_interval")]
    pub ack_drop_interval: u64,
    /// Initial playout target delay in milliseconds.
    #[serde(default = "default_target_delay_ms")]
    pub target_delay_ms: u64,
    /// Extra empty exchange rounds allowed for retransmission to finish.
    #[serde(default = "default_drain_rounds")]
    pub drain_rounds: u32,
}

fn default_frames() -> u32 {
    1000
}

fn default_data_drop_interval() -> u64 {
    11
}

fn default_ack_drop_interval() -> u64 {
    13
}

fn default_target_delay_ms() -> u64 {
    60
}

fn default_drain_rounds() -> u32 {
    200
}

impl Default for SimulateConfig {
    fn default() -> Self {
        SimulateConfig {
            frames: default_frames(),
            data_drop_interval: default_data_drop_interval(),
            ack_drop_interval: default_ack_drop_interval(),
            target_delay_ms: default_target_delay_ms(),
            drain_rounds: default_drain_rounds(),
        }
    }
}

impl SimulateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames == 0 {
            return Err(ConfigError::Invalid("frames must be positive".into()));
        }
        if self.data_drop_interval == 1 || self.ack_drop_interval == 1 {
            return Err(ConfigError::Invalid(
                "a drop interval of 1 drops every packet".into(),
            ));
        }
        Ok(())
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub simulate: SimulateConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.simulate.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.simulate.frames, 1000);
        assert_eq!(config.simulate.data_drop_interval, 11);
        assert_eq!(config.simulate.ack_drop_interval, 13);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [simulate]
            frames = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.simulate.frames, 50);
        assert_eq!(config.simulate.target_delay_ms, 60);
    }

    #[test]
    fn test_validate_rejects_drop_everything() {
        let mut config = SimulateConfig::default();
        config.data_drop_interval = 1;
        assert!(config.validate().is_err());
    }
}
