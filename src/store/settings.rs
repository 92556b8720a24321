//! Derivation of log identity and client properties from [`StoreConfig`]

use crate::common::{Error, Result, StoreConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// Client property names
pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
pub const CLIENT_ID: &str = "client.id";
pub const KEY_SERIALIZER: &str = "key.serializer";
pub const VALUE_SERIALIZER: &str = "value.serializer";
pub const KEY_DESERIALIZER: &str = "key.deserializer";
pub const VALUE_DESERIALIZER: &str = "value.deserializer";
pub const RETRIES: &str = "retries";
pub const ENABLE_AUTO_COMMIT: &str = "enable.auto.commit";
pub const AUTO_OFFSET_RESET: &str = "auto.offset.reset";
pub const ISOLATION_LEVEL: &str = "isolation.level";

// Topic config names
pub const CLEANUP_POLICY: &str = "cleanup.policy";
pub const MIN_INSYNC_REPLICAS: &str = "min.insync.replicas";
pub const MAX_MESSAGE_BYTES: &str = "max.message.bytes";

/// Keys and values travel as opaque byte arrays
pub const BYTE_ARRAY_CODEC: &str = "byte-array";

/// Suffix appended to the configured client id prefix
pub const CLIENT_ID_SUFFIX: &str = "offsets";

pub type ClientProperties = BTreeMap<String, String>;

/// Which records a consumer may read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "read_uncommitted",
            IsolationLevel::ReadCommitted => "read_committed",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read_uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            other => Err(Error::InvalidConfig(format!(
                "unknown isolation level: {}",
                other
            ))),
        }
    }
}

/// Isolation level the store's consumer runs with.
///
/// An explicit operator value always wins. Without one, exactly-once
/// upstream writers force `read_committed`; otherwise the property is left
/// unset and the log client's default applies.
pub fn derive_consumer_isolation(
    user_supplied: Option<IsolationLevel>,
    exactly_once_enabled: bool,
) -> Option<IsolationLevel> {
    match (user_supplied, exactly_once_enabled) {
        (Some(level), _) => Some(level),
        (None, true) => Some(IsolationLevel::ReadCommitted),
        (None, false) => None,
    }
}

/// Everything needed to auto-create the backing log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDescriptor {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
    pub configs: BTreeMap<String, String>,
}

impl TopicDescriptor {
    /// Record size limit, if configured and parseable
    pub fn max_message_bytes(&self) -> Option<usize> {
        self.configs
            .get(MAX_MESSAGE_BYTES)
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Output of `configure`: the log identity plus client properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    pub topic: TopicDescriptor,
    pub producer: ClientProperties,
    pub consumer: ClientProperties,
}

impl LogSettings {
    /// Derive settings from the store configuration. Pure; performs no I/O.
    pub fn derive(config: &StoreConfig) -> Result<Self> {
        config.validate()?;

        let client_id = format!("{}{}", config.client_id_prefix, CLIENT_ID_SUFFIX);
        let bootstrap = config.bootstrap_servers.join(",");

        let mut producer = config.producer_overrides.clone();
        producer.insert(BOOTSTRAP_SERVERS.into(), bootstrap.clone());
        producer.insert(KEY_SERIALIZER.into(), BYTE_ARRAY_CODEC.into());
        producer.insert(VALUE_SERIALIZER.into(), BYTE_ARRAY_CODEC.into());
        // Failures are reported to the caller of `set`, never retried here
        producer.insert(RETRIES.into(), "0".into());
        producer.insert(CLIENT_ID.into(), client_id.clone());

        let mut consumer = config.consumer_overrides.clone();
        consumer.insert(BOOTSTRAP_SERVERS.into(), bootstrap);
        consumer.insert(KEY_DESERIALIZER.into(), BYTE_ARRAY_CODEC.into());
        consumer.insert(VALUE_DESERIALIZER.into(), BYTE_ARRAY_CODEC.into());
        consumer.insert(ENABLE_AUTO_COMMIT.into(), "false".into());
        consumer.insert(AUTO_OFFSET_RESET.into(), "earliest".into());
        consumer.insert(CLIENT_ID.into(), client_id);

        let user_isolation = consumer
            .get(ISOLATION_LEVEL)
            .map(|v| v.parse::<IsolationLevel>())
            .transpose()?;
        if config.exactly_once_source && user_isolation == Some(IsolationLevel::ReadUncommitted) {
            tracing::warn!(
                "Exactly-once source support is enabled but the offsets consumer is configured \
                 with {}; it may observe records from aborted transactions",
                IsolationLevel::ReadUncommitted
            );
        }
        match derive_consumer_isolation(user_isolation, config.exactly_once_source) {
            Some(level) => {
                consumer.insert(ISOLATION_LEVEL.into(), level.as_str().into());
            }
            None => {
                consumer.remove(ISOLATION_LEVEL);
            }
        }

        let mut configs = config.topic_settings.clone();
        configs.insert(CLEANUP_POLICY.into(), "compact".into());

        Ok(Self {
            topic: TopicDescriptor {
                name: config.topic.clone(),
                partitions: config.partitions,
                replication_factor: config.replication_factor,
                configs,
            },
            producer,
            consumer,
        })
    }
}
