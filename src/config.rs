//! Runtime settings.
//!
//! Sources, lowest priority first: built-in defaults, an optional TOML file,
//! `TRADE_ANCHOR_<SECTION>__<KEY>` environment variables, and finally the
//! plain secret variables (`PINATA_API_KEY`, `ETH_PRIVATE_KEY`, ...). Missing
//! secrets are not a load error; they surface when a batch cycle needs them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "TRADE_ANCHOR";
pub const DEFAULT_CONFIG_FILE: &str = "trade-anchor.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub batch: BatchSettings,
    pub store: StoreSettings,
    pub chain: ChainSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub allowed_origin: String,
    /// Prometheus listener, only used with the `metrics-exporter` feature.
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            allowed_origin: "http://localhost:5173".to_string(),
            metrics_port: 9000,
        }
    }
}

/// What happens to a drained batch when publish or commit fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Put the records back in the buffer for the next cycle.
    #[default]
    Requeue,
    /// Drop them from memory; the artifact on disk is the only copy.
    ArtifactOnly,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub period_secs: u64,
    pub artifact_dir: PathBuf,
    pub on_failure: RecoveryPolicy,
    pub flush_on_shutdown: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            period_secs: 60,
            artifact_dir: PathBuf::from("."),
            on_failure: RecoveryPolicy::Requeue,
            flush_on_shutdown: true,
        }
    }
}

impl BatchSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.pinata.cloud/pinning/pinFileToIPFS".to_string(),
            api_key: None,
            api_secret: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    pub rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub contract_address: Option<String>,
    pub chain_id: Option<u64>,
    pub gas_limit: u64,
    pub gas_price_bump_percent: u64,
    pub max_broadcast_attempts: u32,
    pub underpriced_backoff_secs: u64,
    pub mined_timeout_secs: u64,
    pub receipt_poll_millis: u64,
    pub status_probe_timeout_secs: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rpc_url: None,
            private_key: None,
            contract_address: None,
            chain_id: None,
            gas_limit: 300_000,
            gas_price_bump_percent: 10,
            max_broadcast_attempts: 2,
            underpriced_backoff_secs: 10,
            mined_timeout_secs: 120,
            receipt_poll_millis: 1_000,
            status_probe_timeout_secs: 10,
        }
    }
}

impl ChainSettings {
    pub fn underpriced_backoff(&self) -> Duration {
        Duration::from_secs(self.underpriced_backoff_secs)
    }

    pub fn mined_timeout(&self) -> Duration {
        Duration::from_secs(self.mined_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_millis.max(1))
    }

    pub fn status_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.status_probe_timeout_secs)
    }
}

impl Settings {
    /// Loads settings from `path` (or the default file name when `None`) and
    /// the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p.to_path_buf()).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("store.api_key", plain_env("PINATA_API_KEY"))?
            .set_override_option("store.api_secret", plain_env("PINATA_API_SECRET"))?
            .set_override_option("chain.rpc_url", plain_env("ETH_RPC_URL"))?
            .set_override_option("chain.private_key", plain_env("ETH_PRIVATE_KEY"))?
            .set_override_option("chain.contract_address", plain_env("CONTRACT_ADDRESS"))?
            .build()?
            .try_deserialize()
    }
}

fn plain_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
