//! State Stores
//!
//! Groups and their infras live in two stores:
//!
//! - the **durable store** is the system of record. Ownership of a group is
//!   registered there with a create-if-absent write, which is also what keeps
//!   two shards from claiming the same group or device.
//! - the **cache store** is a projection of the durable store, written after
//!   it and rebuildable from it at any time.
//!
//! ```text
//! CommandProcessor
//!       │ 1. write
//!       ▼
//! DurableStore (memory | etcd)
//!       │ 2. project
//!       ▼
//! CacheStore (memory)
//! ```
//!
//! Any `StoreError` aborts the command that hit it; no response is published
//! for that command.

mod etcd;
mod memory;

pub use etcd::EtcdStore;
pub use memory::{MemoryCache, MemoryDurableStore};

use crate::models::{GroupRecord, InfraRecord, Insert, ShardRecord};
use async_trait::async_trait;
use cgw_core::{GroupId, InfraMac, ShardId};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// System of record for groups, infras and live shards.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Mark a shard as live. Registrations expire if the shard process dies.
    async fn register_shard(&self, shard_id: ShardId) -> StoreResult<()>;

    async fn deregister_shard(&self, shard_id: ShardId) -> StoreResult<()>;

    /// Currently registered shards, sorted by id.
    async fn active_shards(&self) -> StoreResult<Vec<ShardId>>;

    /// Create-if-absent. Returns the existing record when the group id is taken.
    async fn insert_group(&self, group: &GroupRecord) -> StoreResult<Insert<GroupRecord>>;

    async fn get_group(&self, gid: GroupId) -> StoreResult<Option<GroupRecord>>;

    /// Overwrite an existing group record.
    async fn update_group(&self, group: &GroupRecord) -> StoreResult<()>;

    /// Returns whether a record was removed.
    async fn delete_group(&self, gid: GroupId) -> StoreResult<bool>;

    async fn list_groups(&self) -> StoreResult<Vec<GroupRecord>>;

    /// Create-if-absent keyed by hardware address. Returns the existing
    /// assignment when the device already belongs to a group.
    async fn insert_infra(&self, infra: &InfraRecord) -> StoreResult<Insert<InfraRecord>>;

    async fn get_infra(&self, mac: &InfraMac) -> StoreResult<Option<InfraRecord>>;

    /// Returns whether a record was removed.
    async fn delete_infra(&self, mac: &InfraMac) -> StoreResult<bool>;

    /// Infras assigned to `gid`, sorted by address.
    async fn list_infras(&self, gid: GroupId) -> StoreResult<Vec<InfraRecord>>;
}

/// Fast-access projection of the durable store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn put_group(&self, group: &GroupRecord) -> StoreResult<()>;

    async fn get_group(&self, gid: GroupId) -> StoreResult<Option<GroupRecord>>;

    async fn remove_group(&self, gid: GroupId) -> StoreResult<()>;

    async fn put_shard(&self, shard: &ShardRecord) -> StoreResult<()>;

    async fn get_shard(&self, shard_id: ShardId) -> StoreResult<Option<ShardRecord>>;

    async fn remove_shard(&self, shard_id: ShardId) -> StoreResult<()>;

    /// Stored under `(infra.shard_id, infra.mac)`.
    async fn put_infra(&self, infra: &InfraRecord) -> StoreResult<()>;

    async fn get_infra(&self, shard_id: ShardId, mac: &InfraMac) -> StoreResult<Option<InfraRecord>>;

    async fn remove_infra(&self, shard_id: ShardId, mac: &InfraMac) -> StoreResult<()>;
}
