//! Session and fabric configuration.
//!
//! Values come from a JSON file or defaults, then `COLLECTIVE_*` environment
//! variables override them, e.g. `COLLECTIVE_ALGO=RING`.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CollectiveError, Result};
use crate::strategy::Algorithm;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Topology algorithm name. Unknown names fall back to STAR when the
    /// session is built.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    #[serde(default)]
    pub fabric: FabricConfig,
}

fn default_algorithm() -> String {
    Algorithm::Star.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            fabric: FabricConfig::default(),
        }
    }
}

impl Config {
    pub fn with_algorithm(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| CollectiveError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_json_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = env::var("COLLECTIVE_ALGO") {
            debug!("COLLECTIVE_ALGO overrides algorithm: {}", v);
            self.algorithm = v;
        }
        if let Ok(v) = env::var("COLLECTIVE_CONNECT_RETRIES") {
            self.fabric.connect_retries = v
                .parse()
                .map_err(|_| CollectiveError::Config(format!("bad COLLECTIVE_CONNECT_RETRIES: {v}")))?;
        }
        Ok(())
    }

    pub fn algorithm(&self) -> Algorithm {
        Algorithm::resolve(&self.algorithm)
    }
}

/// Connection behaviour of the TCP fabric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricConfig {
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Largest payload accepted in one frame, either way.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: u64,
}

fn default_connect_retries() -> u32 {
    50
}
fn default_initial_backoff_ms() -> u64 {
    20
}
fn default_max_backoff_ms() -> u64 {
    1000
}
fn default_max_message_bytes() -> u64 {
    1 << 30
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            connect_retries: default_connect_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl FabricConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
