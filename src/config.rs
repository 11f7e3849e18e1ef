use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::stock::StockSchema;

/// Errors raised while assembling the bot configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("bot token not set (BOT_TOKEN)")]
    MissingToken,
    #[error("guild id not set (guild_id in config or GUILD_ID)")]
    MissingGuild,
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bot configuration, built once at startup and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Guild the slash commands are registered in
    #[serde(default)]
    pub guild_id: u64,

    /// Channel that receives a notice for every generated item
    #[serde(default)]
    pub admin_channel_id: Option<u64>,

    /// Minimum seconds between two successful generations per user
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Stock document layout for this deployment
    #[serde(default)]
    pub schema: StockSchema,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub premium: PremiumConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_stock_path")]
    pub stock_path: PathBuf,
    #[serde(default = "default_cooldown_path")]
    pub cooldown_path: PathBuf,
}

/// Payment details shown by `/upgrade_premium`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PremiumConfig {
    #[serde(default)]
    pub addresses: Vec<PaymentAddress>,
    /// Free-form footer, e.g. who to contact after paying
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAddress {
    pub label: String,
    pub address: String,
}

fn default_cooldown_secs() -> u64 {
    3600
}

fn default_stock_path() -> PathBuf {
    PathBuf::from("stock.json")
}

fn default_cooldown_path() -> PathBuf {
    PathBuf::from("cooldown.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            stock_path: default_stock_path(),
            cooldown_path: default_cooldown_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            guild_id: 0,
            admin_channel_id: None,
            cooldown_secs: default_cooldown_secs(),
            schema: StockSchema::default(),
            storage: StorageConfig::default(),
            premium: PremiumConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        info!(
            guild_id = config.guild_id,
            schema = %config.schema,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Reject configurations the bot cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.guild_id == 0 {
            return Err(ConfigError::MissingGuild);
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}
