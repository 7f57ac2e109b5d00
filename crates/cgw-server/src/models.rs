//! Data models for cgw-server
//!
//! Records persisted in the durable store and projected into the cache.

use cgw_core::{GroupId, InfraMac, ShardId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Infrastructure group (durable `groups` row, cache group hash)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Group ID
    pub gid: GroupId,
    /// Owning shard, fixed for the lifetime of the group
    pub shard_id: ShardId,
    /// Number of infras currently assigned
    pub infras_assigned: u32,
    /// Correlation id of the command that created the group
    pub created_by: Uuid,
    /// When created
    pub created_at: DateTime<Utc>,
}

impl GroupRecord {
    pub fn new(gid: GroupId, shard_id: ShardId, created_by: Uuid) -> Self {
        Self {
            gid,
            shard_id,
            infras_assigned: 0,
            created_by,
            created_at: Utc::now(),
        }
    }

    /// Fields shared by both stores agree.
    pub fn agrees_with(&self, other: &GroupRecord) -> bool {
        self.gid == other.gid
            && self.shard_id == other.shard_id
            && self.infras_assigned == other.infras_assigned
    }
}

/// Infrastructure device assignment (durable `infras` row, cache infra entry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraRecord {
    pub mac: InfraMac,
    pub group_id: GroupId,
    /// Owner of `group_id` at assignment time
    pub shard_id: ShardId,
}

/// Shard-level aggregate counters (cache shard hash)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRecord {
    pub id: ShardId,
    pub assigned_groups_num: u32,
    pub groups_capacity: u32,
    pub groups_threshold: u32,
    pub group_infras_capacity: u32,
}

/// Outcome of a create-if-absent write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert<T> {
    /// The record was written
    Created,
    /// A record with the same key already exists; nothing was written
    Exists(T),
}

impl<T> Insert<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, Insert::Created)
    }
}
