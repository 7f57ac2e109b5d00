//! ShardActor Message Types

use cgw_core::{CommandEnvelope, Partition, ResponseEnvelope, ShardId};
use kameo::Reply;
use serde::{Deserialize, Serialize};

/// A command handed to a shard.
///
/// Commands come either from one of the shard's partitions or, unchanged,
/// from another shard's relay.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub command: CommandEnvelope,
    /// Shard that forwarded this command, if it was relayed
    pub relayed_from: Option<ShardId>,
    /// Partition the command was consumed from, if it came off the topic
    pub partition: Option<Partition>,
}

impl Inbound {
    pub fn consumed(command: CommandEnvelope, partition: Partition) -> Self {
        Self {
            command,
            relayed_from: None,
            partition: Some(partition),
        }
    }

    pub fn relayed(command: CommandEnvelope, from: ShardId) -> Self {
        Self {
            command,
            relayed_from: Some(from),
            partition: None,
        }
    }
}

/// What a shard did with an inbound command.
#[derive(Debug, Clone, PartialEq, Eq, Reply)]
pub enum Disposition {
    /// This shard answered; the response must be published.
    Answered(ResponseEnvelope),
    /// Forwarded to the owning shard, which answers.
    Relayed(ShardId),
    /// A store call failed; nothing is published and the client times out.
    Aborted { reason: String },
}

/// Live shard set changed.
#[derive(Debug, Clone)]
pub struct TopologyChanged {
    pub shards: Vec<ShardId>,
}

#[derive(Debug, Clone, Reply)]
pub struct TopologyAck {
    pub previous_count: usize,
    pub new_count: usize,
}

/// Request current shard statistics.
#[derive(Debug, Clone)]
pub struct GetShardStats;

#[derive(Debug, Clone, Serialize, Deserialize, Reply)]
pub struct ShardStats {
    pub shard_id: ShardId,
    pub assigned_groups_num: u32,
    pub groups_capacity: u32,
    pub groups_threshold: u32,
    pub group_infras_capacity: u32,
    pub active_shards: Vec<ShardId>,
    pub commands_answered: u64,
    pub commands_relayed: u64,
    pub commands_aborted: u64,
}
