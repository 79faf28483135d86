//! Configuration for the session agent.

use crate::queue::DeliveryConfig;
use crate::reconcile::ReconcileConfig;
use crate::risk::RiskThresholds;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[cfg(feature = "gateway")]
use crate::gateway::GatewayConfig;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delivery queue behavior
    pub delivery: DeliveryConfig,

    /// Collection endpoint
    #[cfg(feature = "gateway")]
    pub gateway: GatewayConfig,

    /// Deduplication bucket settings
    pub reconcile: ReconcileConfig,

    /// Risk rule thresholds
    pub risk: RiskThresholds,

    /// Path for the session store and delivery stats
    pub data_path: PathBuf,

    /// Port for `serve` (0 picks a random port)
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-session-agent");

        Self {
            delivery: DeliveryConfig::default(),
            #[cfg(feature = "gateway")]
            gateway: GatewayConfig::default(),
            reconcile: ReconcileConfig::default(),
            risk: RiskThresholds::default(),
            data_path: data_dir,
            server_port: 8787,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file, or defaults if it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-session-agent")
            .join("config.json")
    }

    /// Where the file-backed session store lives.
    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("sessions.json")
    }

    /// Where delivery stats are persisted.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("delivery.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serde support for `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
