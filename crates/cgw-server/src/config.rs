//! Shard Configuration
//!
//! Centralized configuration for a CGW shard with environment variable
//! overrides. Capacity values are exported verbatim as metrics.

use cgw_core::ShardId;
use std::time::Duration;

/// Default command topic name
pub const DEFAULT_COMMAND_TOPIC: &str = "CnC";

/// Default response topic name
pub const DEFAULT_RESPONSE_TOPIC: &str = "CnC_Res";

/// Default consumer group shared by all shards
pub const DEFAULT_CONSUMER_GROUP: &str = "CGW";

/// Shard configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct ShardConfig {
    // Identity
    /// Shard identifier (env: CGW_ID)
    pub shard_id: ShardId,

    // HTTP
    /// Address the API and metrics endpoint bind to (env: CGW_METRICS_ADDR)
    pub metrics_addr: String,

    // Broker
    /// Topic commands are produced to (env: CGW_COMMAND_TOPIC)
    pub command_topic: String,

    /// Topic responses are published to (env: CGW_RESPONSE_TOPIC)
    pub response_topic: String,

    /// Consumer group all shards join (env: CGW_CONSUMER_GROUP)
    pub consumer_group: String,

    /// Number of partitions of the command topic (env: CGW_PARTITIONS_NUM)
    pub partitions_num: usize,

    // Capacity
    /// Maximum number of groups one shard may own (env: CGW_GROUPS_CAPACITY)
    pub groups_capacity: u32,

    /// Assigned-groups level that triggers a load warning (env: CGW_GROUPS_THRESHOLD)
    pub groups_threshold: u32,

    /// Maximum number of infras per group (env: CGW_GROUP_INFRAS_CAPACITY)
    pub group_infras_capacity: u32,

    // Durable store
    /// Etcd endpoints; empty selects the in-memory store (env: ETCD_ENDPOINTS)
    pub etcd_endpoints: Vec<String>,

    /// TTL for the shard registration lease (seconds)
    pub lease_ttl: i64,

    /// Interval for lease keep-alive (1/3 of TTL recommended)
    pub keepalive_interval: Duration,

    // Etcd backoff settings
    /// Initial interval for etcd connection retry
    pub etcd_backoff_initial: Duration,

    /// Maximum interval for etcd connection retry
    pub etcd_backoff_max: Duration,

    /// Maximum elapsed time for etcd connection retries
    pub etcd_backoff_max_elapsed: Duration,

    /// Multiplier for etcd backoff
    pub etcd_backoff_multiplier: f64,

    // Client
    /// How long a client waits for the response to a command (env: CGW_COMMAND_TIMEOUT_SECS)
    pub command_timeout: Duration,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            shard_id: 0,

            metrics_addr: "0.0.0.0:8080".to_string(),

            command_topic: DEFAULT_COMMAND_TOPIC.to_string(),
            response_topic: DEFAULT_RESPONSE_TOPIC.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            partitions_num: 2,

            groups_capacity: 1000,
            groups_threshold: 50,
            group_infras_capacity: 2000,

            etcd_endpoints: Vec::new(),
            lease_ttl: 15,
            keepalive_interval: Duration::from_secs(5),

            etcd_backoff_initial: Duration::from_secs(1),
            etcd_backoff_max: Duration::from_secs(10),
            etcd_backoff_max_elapsed: Duration::from_secs(60),
            etcd_backoff_multiplier: 2.0,

            command_timeout: Duration::from_secs(30),
        }
    }
}

impl ShardConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(id) = env_parse::<ShardId>("CGW_ID") {
            config.shard_id = id;
        }

        if let Ok(addr) = std::env::var("CGW_METRICS_ADDR") {
            config.metrics_addr = addr;
        }

        if let Ok(topic) = std::env::var("CGW_COMMAND_TOPIC") {
            config.command_topic = topic;
        }

        if let Ok(topic) = std::env::var("CGW_RESPONSE_TOPIC") {
            config.response_topic = topic;
        }

        if let Ok(group) = std::env::var("CGW_CONSUMER_GROUP") {
            config.consumer_group = group;
        }

        if let Some(num) = env_parse::<usize>("CGW_PARTITIONS_NUM") {
            config.partitions_num = num.max(1);
        }

        if let Some(capacity) = env_parse::<u32>("CGW_GROUPS_CAPACITY") {
            config.groups_capacity = capacity;
        }

        if let Some(threshold) = env_parse::<u32>("CGW_GROUPS_THRESHOLD") {
            config.groups_threshold = threshold;
        }

        if let Some(capacity) = env_parse::<u32>("CGW_GROUP_INFRAS_CAPACITY") {
            config.group_infras_capacity = capacity;
        }

        if let Ok(endpoints) = std::env::var("ETCD_ENDPOINTS") {
            config.etcd_endpoints = split_endpoints(&endpoints);
        }

        if let Some(secs) = env_parse::<u64>("CGW_COMMAND_TIMEOUT_SECS") {
            config.command_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Same configuration for another shard of the same cluster.
    pub fn for_shard(&self, shard_id: ShardId) -> Self {
        Self {
            shard_id,
            ..self.clone()
        }
    }

    /// Capacity limits enforced by the command processor.
    pub fn limits(&self) -> CapacityLimits {
        CapacityLimits {
            groups_capacity: self.groups_capacity,
            groups_threshold: self.groups_threshold,
            group_infras_capacity: self.group_infras_capacity,
        }
    }
}

/// Per-shard capacity limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityLimits {
    pub groups_capacity: u32,
    pub groups_threshold: u32,
    pub group_infras_capacity: u32,
}

impl Default for CapacityLimits {
    fn default() -> Self {
        ShardConfig::default().limits()
    }
}

/// Split a comma-separated endpoint list, dropping blanks.
pub fn split_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
