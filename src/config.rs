//! Node configuration

use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::blockchain::MinerSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// Statically known peers, e.g. `http://localhost:5001`
    pub peers: Vec<String>,
    /// Seed the chain with this node's address as genesis
    pub genesis: bool,
    /// Required leading zero characters in a block hash
    pub difficulty: usize,
    /// Fee used when a transaction request does not name one
    pub default_fee: f64,
    pub peer_timeout_secs: u64,
    pub idle_interval_ms: u64,
    pub attempts_per_yield: u32,
    /// Hex encoded ed25519 secret key; a fresh identity is generated if unset
    pub secret_key: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: "127.0.0.1".to_string(),
            port: 5000,
            peers: Vec::new(),
            genesis: false,
            difficulty: 4,
            default_fee: 0.1,
            peer_timeout_secs: 10,
            idle_interval_ms: 50,
            attempts_per_yield: 256,
            secret_key: None,
        }
    }
}

impl NodeConfig {
    /// Loads a TOML file; a missing path yields the defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml(&contents)?
            }
            None => NodeConfig::default(),
        };
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=64).contains(&self.difficulty) {
            return Err(ConfigError::Invalid(format!(
                "difficulty must be between 1 and 64, got {}",
                self.difficulty
            )));
        }
        if !self.default_fee.is_finite() || self.default_fee < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "default_fee must not be negative, got {}",
                self.default_fee
            )));
        }
        if self.peer_timeout_secs == 0 {
            return Err(ConfigError::Invalid("peer_timeout_secs must be positive".to_string()));
        }
        if self.attempts_per_yield == 0 {
            return Err(ConfigError::Invalid("attempts_per_yield must be positive".to_string()));
        }
        Ok(())
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn miner_settings(&self) -> MinerSettings {
        MinerSettings {
            idle_interval: Duration::from_millis(self.idle_interval_ms),
            attempts_per_yield: self.attempts_per_yield,
        }
    }

    /// URL other nodes use to reach this one
    pub fn public_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
