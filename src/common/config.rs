//! Configuration for offsetkv

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable prefix, e.g. `OFFSETKV__TOPIC=connect-offsets`
pub const ENV_PREFIX: &str = "OFFSETKV";

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Name of the compacted log backing the store
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Partition count used when the log is auto-created
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Replication factor used when the log is auto-created
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u16,

    /// Bootstrap addresses of the log cluster
    #[serde(default)]
    pub bootstrap_servers: Vec<String>,

    /// Upstream writers use exactly-once semantics
    #[serde(default)]
    pub exactly_once_source: bool,

    /// Prefix for the producer/consumer client ids (`<prefix>offsets`)
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// Extra configs applied when the log is created
    /// (e.g. `min.insync.replicas`, `max.message.bytes`)
    #[serde(default)]
    pub topic_settings: BTreeMap<String, String>,

    /// Producer properties supplied by the operator
    #[serde(default)]
    pub producer_overrides: BTreeMap<String, String>,

    /// Consumer properties supplied by the operator
    #[serde(default)]
    pub consumer_overrides: BTreeMap<String, String>,

    /// Local log file used by the file-backed log
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Flush policy of the file-backed log
    #[serde(default)]
    pub sync_policy: SyncPolicy,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_topic() -> String {
    "offsets".to_string()
}
fn default_partitions() -> u32 {
    25
}
fn default_replication_factor() -> u16 {
    3
}
fn default_client_id_prefix() -> String {
    "offsetkv-".to_string()
}
fn default_log_path() -> PathBuf {
    PathBuf::from("./offsetkv-data/offsets.log")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            partitions: default_partitions(),
            replication_factor: default_replication_factor(),
            bootstrap_servers: Vec::new(),
            exactly_once_source: false,
            client_id_prefix: default_client_id_prefix(),
            topic_settings: BTreeMap::new(),
            producer_overrides: BTreeMap::new(),
            consumer_overrides: BTreeMap::new(),
            log_path: default_log_path(),
            sync_policy: SyncPolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl StoreConfig {
    /// Load from an optional TOML file, then apply `OFFSETKV__*` environment
    /// overrides. Missing sources fall back to defaults.
    /// `OFFSETKV__BOOTSTRAP_SERVERS` takes a comma-separated list.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("offsetkv").required(false));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("bootstrap_servers"),
            )
            .build()?
            .try_deserialize::<StoreConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no log could be created with
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::InvalidConfig("topic must not be empty".into()));
        }
        if self.partitions == 0 {
            return Err(Error::InvalidConfig("partitions must be at least 1".into()));
        }
        if self.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// When the file-backed log flushes appended records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// fsync after every append
    Always,
    /// Flush the buffer to the OS after every append
    #[default]
    Flush,
    /// Leave flushing to the buffer
    Never,
}
