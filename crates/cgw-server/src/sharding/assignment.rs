//! Range assignment of command-topic partitions to shards
//!
//! Same result as Kafka's range assignor for a single topic:
//! - live shards are sorted by id
//! - each gets `P / n` contiguous partitions
//! - the first `P % n` shards get one extra

use cgw_core::{Partition, ShardId};

/// Partition-to-shard assignment for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    partitions_num: usize,
    /// Live shards (sorted, deduplicated)
    shards: Vec<ShardId>,
}

impl PartitionAssignment {
    pub fn new(partitions_num: usize, shards: Vec<ShardId>) -> Self {
        let mut assignment = Self {
            partitions_num,
            shards: Vec::new(),
        };
        assignment.rebuild(shards);
        assignment
    }

    /// Rebuild with a new set of live shards.
    pub fn rebuild(&mut self, mut shards: Vec<ShardId>) {
        shards.sort_unstable();
        shards.dedup();
        self.shards = shards;
    }

    pub fn partitions_num(&self) -> usize {
        self.partitions_num
    }

    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    /// Partitions consumed by `shard_id`. Empty if the shard is not live or
    /// there are more shards than partitions.
    pub fn partitions_for_shard(&self, shard_id: ShardId) -> Vec<Partition> {
        let Some(index) = self.shards.iter().position(|s| *s == shard_id) else {
            return Vec::new();
        };
        let n = self.shards.len();
        let per_shard = self.partitions_num / n;
        let extra = self.partitions_num % n;

        let start = index * per_shard + index.min(extra);
        let len = per_shard + usize::from(index < extra);
        (start..start + len).map(|p| p as Partition).collect()
    }

    /// Shard consuming `partition`, if any.
    pub fn owner_of(&self, partition: Partition) -> Option<ShardId> {
        if partition < 0 || partition as usize >= self.partitions_num {
            return None;
        }
        self.shards
            .iter()
            .copied()
            .find(|shard| self.partitions_for_shard(*shard).contains(&partition))
    }
}
