//! Runtime settings: an optional config file layered under `VALMON__*`
//! environment variables.
//!
//! Node endpoints come from the `gRpc` table as `<chain>Ip` / `<chain>Port`
//! pairs, or from an explicit `endpoint` on the chain entry. A chain entry
//! with `rest_endpoint` is polled through the REST gateway instead.

use crate::alerts::AlertSettings;
use crate::monitor::CycleLimits;
use crate::rpc::{ChainCli, RpcError};
use crate::storage::PersistenceConfig;
use crate::types::MonitorObj;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "VALMON";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub alert: AlertSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    /// `<chain>Ip` and `<chain>Port` entries
    #[serde(default, alias = "gRpc")]
    pub grpc: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_blocks")]
    pub max_blocks_per_cycle: i64,
    #[serde(default = "default_stats_window")]
    pub stats_window: i64,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_blocks() -> i64 {
    100
}

fn default_stats_window() -> i64 {
    10_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_blocks_per_cycle: default_max_blocks(),
            stats_window: default_stats_window(),
            chains: Vec::new(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn limits(&self, chain: &ChainConfig) -> CycleLimits {
        CycleLimits {
            max_blocks_per_cycle: self.max_blocks_per_cycle,
            stats_window: self.stats_window,
            start_height: chain.start_height,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    /// gRPC endpoint; overrides the `gRpc` lookup
    #[serde(default)]
    pub endpoint: Option<String>,
    /// REST gateway endpoint, used in place of gRPC when set
    #[serde(default)]
    pub rest_endpoint: Option<String>,
    #[serde(default)]
    pub start_height: i64,
    #[serde(default)]
    pub validators: Vec<MonitorObj>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_keep_snapshots")]
    pub keep_snapshots: usize,
}

fn default_data_dir() -> PathBuf {
    PersistenceConfig::default().data_dir
}

fn default_keep_snapshots() -> usize {
    PersistenceConfig::default().keep_snapshots
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            keep_snapshots: default_keep_snapshots(),
        }
    }
}

impl StorageConfig {
    pub fn persistence(&self) -> PersistenceConfig {
        PersistenceConfig::new(&self.data_dir).with_keep_snapshots(self.keep_snapshots)
    }
}

impl Settings {
    /// Load from `path` (format picked by extension) and the environment,
    /// e.g. `VALMON__ALERT__PROPORTION=0.2`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        tracing::debug!(
            chains = settings.monitor.chains.len(),
            interval_secs = settings.monitor.interval_secs,
            "Settings loaded"
        );
        Ok(settings)
    }

    /// Node endpoint for a chain. The `gRpc` lookup builds
    /// `http://{ip}:{port}`, matching keys case-insensitively.
    pub fn endpoint(&self, chain: &ChainConfig) -> Result<NodeEndpoint, ConfigError> {
        if let Some(url) = &chain.rest_endpoint {
            return Ok(NodeEndpoint::Rest(url.clone()));
        }
        if let Some(url) = &chain.endpoint {
            return Ok(NodeEndpoint::Grpc(url.clone()));
        }

        let lookup = |suffix: &str| {
            let key = format!("{}{}", chain.name, suffix);
            self.grpc
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&key))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| ConfigError::MissingEndpoint(key))
        };

        Ok(NodeEndpoint::Grpc(format!(
            "http://{}:{}",
            lookup("Ip")?,
            lookup("Port")?
        )))
    }
}

/// Where a chain's node answers queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEndpoint {
    Grpc(String),
    Rest(String),
}

impl NodeEndpoint {
    pub fn connect(&self, chain_name: &str) -> Result<ChainCli, RpcError> {
        match self {
            NodeEndpoint::Grpc(url) => ChainCli::connect(chain_name, url),
            NodeEndpoint::Rest(url) => ChainCli::connect_rest(chain_name, url),
        }
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEndpoint::Grpc(url) => write!(f, "grpc {}", url),
            NodeEndpoint::Rest(url) => write!(f, "rest {}", url),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing endpoint setting: gRpc.{0}")]
    MissingEndpoint(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TOML: &str = r#"
[gRpc]
cosmosIp = "10.0.0.1"
cosmosPort = 9090

[alert]
proportion = 0.2
targets = [{ type = "Log" }, { type = "Webhook", url = "http://hooks.local/alert" }]

[monitor]
interval_secs = 15

[[monitor.chains]]
name = "cosmos"
start_height = 100
validators = [{ moniker = "X", operator_addr = "cosmosvaloper1x" }]

[[monitor.chains]]
name = "evmos"
rest_endpoint = "http://evmos.local:1317"

[[monitor.chains]]
name = "osmosis"
endpoint = "http://osmosis.local:9090"
"#;

    fn write_config() -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(TOML.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_file() {
        let file = write_config();
        let settings = Settings::load(Some(file.path())).unwrap();

        assert_eq!(settings.alert.proportion, 0.2);
        assert_eq!(settings.alert.targets.len(), 2);
        assert_eq!(settings.monitor.interval(), Duration::from_secs(15));
        assert_eq!(settings.monitor.max_blocks_per_cycle, 100);
        assert_eq!(settings.monitor.chains.len(), 3);

        let cosmos = &settings.monitor.chains[0];
        assert_eq!(cosmos.validators[0].moniker, "X");
        assert!(cosmos.validators[0].operator_addr_hex.is_empty());
        assert_eq!(settings.monitor.limits(cosmos).start_height, 100);
    }

    #[test]
    fn test_endpoint_lookup() {
        let file = write_config();
        let settings = Settings::load(Some(file.path())).unwrap();

        let chains = &settings.monitor.chains;
        assert_eq!(
            settings.endpoint(&chains[0]).unwrap(),
            NodeEndpoint::Grpc("http://10.0.0.1:9090".into())
        );
        assert_eq!(
            settings.endpoint(&chains[1]).unwrap(),
            NodeEndpoint::Rest("http://evmos.local:1317".into())
        );
        assert_eq!(
            settings.endpoint(&chains[2]).unwrap(),
            NodeEndpoint::Grpc("http://osmosis.local:9090".into())
        );

        let missing = ChainConfig {
            name: "juno".into(),
            endpoint: None,
            rest_endpoint: None,
            start_height: 0,
            validators: Vec::new(),
        };
        assert!(matches!(
            settings.endpoint(&missing),
            Err(ConfigError::MissingEndpoint(key)) if key == "junoIp"
        ));
    }

    #[test]
    fn test_endpoint_connect() {
        let endpoint = NodeEndpoint::Rest("http://evmos.local:1317".into());
        assert_eq!(endpoint.connect("evmos").unwrap().chain_name(), "evmos");
        assert_eq!(endpoint.to_string(), "rest http://evmos.local:1317");

        assert!(matches!(
            NodeEndpoint::Grpc("evmos.local:9090".into()).connect("evmos"),
            Err(RpcError::Connection(_))
        ));
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::default();
        assert_eq!(settings.monitor.interval_secs, 30);
        assert_eq!(settings.storage.keep_snapshots, 3);
        assert!(settings.monitor.chains.is_empty());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(matches!(
            Settings::load(Some(Path::new("/nonexistent/valmon.toml"))),
            Err(ConfigError::Load(_))
        ));
    }
}
