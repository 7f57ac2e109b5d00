//! Message Broker
//!
//! Commands travel on a partitioned command topic consumed by the shards as
//! one consumer group; responses travel on a response topic read by every
//! client. The broker is reached through two small traits so a Kafka client
//! can stand in for [`MemoryBroker`] in a deployment.
//!
//! ```text
//! CommandClient ──send(key | partition)──► command topic [p0 p1 .. pN]
//!                                                │ range assignment
//!                                                ▼
//!                                          shard consumer loop
//!                                                │ publish
//!                                                ▼
//! CommandClient ◄──────subscribe──────── response topic
//! ```

mod memory;

pub use memory::MemoryBroker;

use cgw_core::{Partition, ShardId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("partition {partition} out of range (topic has {partitions_num})")]
    UnknownPartition {
        partition: Partition,
        partitions_num: usize,
    },
    #[error("shard {0} consumes no partition")]
    NoPartitionForShard(ShardId),
}

/// Record handed to a producer.
#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    /// Explicit partition; the key hash decides when absent
    pub partition: Option<Partition>,
}

/// Record delivered to a shard's consumer loop.
#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    pub partition: Partition,
    pub offset: u64,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Producer side of the command topic.
pub trait CommandProducer: Send + Sync {
    /// Append a record and return the partition it landed on.
    fn send(&self, record: ProducerRecord) -> Result<Partition, BrokerError>;

    fn partitions_num(&self) -> usize;

    /// Partitions currently consumed by `shard_id`.
    fn partitions_for_shard(&self, shard_id: ShardId) -> Vec<Partition>;
}

/// Producer side of the response topic.
pub trait ResponsePublisher: Send + Sync {
    fn publish(&self, payload: Vec<u8>);
}
