//! In-memory broker
//!
//! Single command topic with a fixed partition count, consumed by the shards
//! of one consumer group, plus a response topic. Records for a partition with
//! no live consumer wait in a backlog until a rebalance hands the partition to
//! a shard.
//!
//! Every response subscriber reads its own unbounded queue, so a slow reader
//! never loses responses published after it subscribed.

use super::{BrokerError, CommandProducer, ConsumerRecord, ProducerRecord, ResponsePublisher};
use crate::config::{ShardConfig, DEFAULT_CONSUMER_GROUP};
use crate::sharding::{partition_for_key, PartitionAssignment};
use cgw_core::{Partition, ShardId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

struct CommandTopic {
    assignment: PartitionAssignment,
    consumers: HashMap<ShardId, mpsc::UnboundedSender<ConsumerRecord>>,
    next_offset: Vec<u64>,
    backlog: BTreeMap<Partition, VecDeque<ConsumerRecord>>,
}

impl CommandTopic {
    /// Hand `record` to the consumer of its partition, or park it.
    fn deliver(&mut self, record: ConsumerRecord) {
        let owner = self.assignment.owner_of(record.partition);
        let record = match owner.and_then(|shard| self.consumers.get(&shard)) {
            Some(tx) => match tx.send(record) {
                Ok(()) => return,
                Err(mpsc::error::SendError(record)) => record,
            },
            None => record,
        };
        trace!(partition = record.partition, offset = record.offset, "Parking record, partition unassigned");
        self.backlog.entry(record.partition).or_default().push_back(record);
    }

    fn flush_backlog(&mut self) {
        let parked = std::mem::take(&mut self.backlog);
        for record in parked.into_values().flatten() {
            self.deliver(record);
        }
    }
}

pub struct MemoryBroker {
    command_topic: String,
    response_topic: String,
    consumer_group: String,
    partitions_num: usize,
    topic: Mutex<CommandTopic>,
    responses: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl MemoryBroker {
    pub fn new(
        command_topic: impl Into<String>,
        response_topic: impl Into<String>,
        partitions_num: usize,
    ) -> Self {
        let partitions_num = partitions_num.max(1);
        Self {
            command_topic: command_topic.into(),
            response_topic: response_topic.into(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            partitions_num,
            topic: Mutex::new(CommandTopic {
                assignment: PartitionAssignment::new(partitions_num, Vec::new()),
                consumers: HashMap::new(),
                next_offset: vec![0; partitions_num],
                backlog: BTreeMap::new(),
            }),
            responses: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &ShardConfig) -> Self {
        Self::new(
            config.command_topic.clone(),
            config.response_topic.clone(),
            config.partitions_num,
        )
        .with_consumer_group(config.consumer_group.clone())
    }

    /// Name the consumer group the shards join.
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    pub fn response_topic(&self) -> &str {
        &self.response_topic
    }

    /// Join the consumer group. Partitions are handed out by [`Self::rebalance`].
    pub fn subscribe(&self, shard_id: ShardId) -> mpsc::UnboundedReceiver<ConsumerRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topic = self.topic.lock();
        topic.consumers.insert(shard_id, tx);
        topic.flush_backlog();
        debug!(shard_id, topic = %self.command_topic, group = %self.consumer_group, "Consumer subscribed");
        rx
    }

    /// Leave the consumer group. Records already delivered to the dropped
    /// receiver are lost.
    pub fn unsubscribe(&self, shard_id: ShardId) {
        self.topic.lock().consumers.remove(&shard_id);
        debug!(shard_id, topic = %self.command_topic, group = %self.consumer_group, "Consumer unsubscribed");
    }

    /// Reassign partitions over `shards` and release parked records.
    pub fn rebalance(&self, shards: Vec<ShardId>) {
        let mut topic = self.topic.lock();
        topic.assignment.rebuild(shards);
        info!(
            topic = %self.command_topic,
            group = %self.consumer_group,
            shards = ?topic.assignment.shards(),
            partitions = self.partitions_num,
            "Rebalanced command topic"
        );
        topic.flush_backlog();
    }

    pub fn assignment(&self) -> PartitionAssignment {
        self.topic.lock().assignment.clone()
    }

    /// Records waiting for an unassigned partition.
    pub fn backlog_len(&self) -> usize {
        self.topic.lock().backlog.values().map(VecDeque::len).sum()
    }

    /// Read the response topic from now on.
    pub fn subscribe_responses(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.responses.lock().push(tx);
        rx
    }
}

impl CommandProducer for MemoryBroker {
    fn send(&self, record: ProducerRecord) -> Result<Partition, BrokerError> {
        let partition = match record.partition {
            Some(p) if p < 0 || p as usize >= self.partitions_num => {
                return Err(BrokerError::UnknownPartition {
                    partition: p,
                    partitions_num: self.partitions_num,
                });
            }
            Some(p) => p,
            None => partition_for_key(&record.key, self.partitions_num),
        };

        let mut topic = self.topic.lock();
        let offset = topic.next_offset[partition as usize];
        topic.next_offset[partition as usize] += 1;
        topic.deliver(ConsumerRecord {
            partition,
            offset,
            key: record.key,
            payload: record.payload,
        });
        Ok(partition)
    }

    fn partitions_num(&self) -> usize {
        self.partitions_num
    }

    fn partitions_for_shard(&self, shard_id: ShardId) -> Vec<Partition> {
        self.topic.lock().assignment.partitions_for_shard(shard_id)
    }
}

impl ResponsePublisher for MemoryBroker {
    fn publish(&self, payload: Vec<u8>) {
        let mut subscribers = self.responses.lock();
        subscribers.retain(|tx| !tx.is_closed());
        if subscribers.is_empty() {
            // Nobody is waiting for an answer.
            trace!(topic = %self.response_topic, "Response dropped, no subscribers");
            return;
        }
        for tx in subscribers.iter() {
            let _ = tx.send(payload.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, partition: Option<Partition>) -> ProducerRecord {
        ProducerRecord {
            key: key.as_bytes().to_vec(),
            payload: key.as_bytes().to_vec(),
            partition,
        }
    }

    #[tokio::test]
    async fn test_explicit_partition_reaches_its_consumer() {
        let broker = MemoryBroker::new("CnC", "CnC_Res", 2);
        let mut rx0 = broker.subscribe(0);
        let mut rx1 = broker.subscribe(1);
        broker.rebalance(vec![0, 1]);

        assert_eq!(broker.send(record("a", Some(1))).unwrap(), 1);
        let got = rx1.recv().await.unwrap();
        assert_eq!(got.partition, 1);
        assert_eq!(got.offset, 0);
        assert!(rx0.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_keyed_send_uses_kafka_partitioner() {
        let broker = MemoryBroker::new("CnC", "CnC_Res", 3);
        let partition = broker.send(record("100", None)).unwrap();
        assert_eq!(partition, partition_for_key(b"100", 3));
    }

    #[tokio::test]
    async fn test_out_of_range_partition_rejected() {
        let broker = MemoryBroker::new("CnC", "CnC_Res", 2);
        assert!(matches!(
            broker.send(record("a", Some(2))),
            Err(BrokerError::UnknownPartition { partition: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_backlog_flushed_on_rebalance() {
        let broker = MemoryBroker::new("CnC", "CnC_Res", 2);
        broker.send(record("a", Some(0))).unwrap();
        broker.send(record("b", Some(0))).unwrap();
        assert_eq!(broker.backlog_len(), 2);

        let mut rx = broker.subscribe(5);
        broker.rebalance(vec![5]);
        assert_eq!(broker.backlog_len(), 0);
        assert_eq!(rx.recv().await.unwrap().offset, 0);
        assert_eq!(rx.recv().await.unwrap().offset, 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_partition_parks_records() {
        let broker = MemoryBroker::new("CnC", "CnC_Res", 2);
        let _rx0 = broker.subscribe(0);
        let rx1 = broker.subscribe(1);
        broker.rebalance(vec![0, 1]);

        drop(rx1);
        broker.send(record("a", Some(1))).unwrap();
        assert_eq!(broker.backlog_len(), 1);
        assert_eq!(broker.partitions_for_shard(1), vec![1]);
    }

    #[test]
    fn test_consumer_group_from_config() {
        let config = ShardConfig {
            consumer_group: "CGW-test".to_string(),
            ..ShardConfig::default()
        };
        let broker = MemoryBroker::from_config(&config);
        assert_eq!(broker.consumer_group(), "CGW-test");
        assert_eq!(MemoryBroker::new("CnC", "CnC_Res", 1).consumer_group(), "CGW");
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_every_response() {
        let broker = MemoryBroker::new("CnC", "CnC_Res", 1);
        let mut rx = broker.subscribe_responses();
        for i in 0..5000u32 {
            broker.publish(i.to_be_bytes().to_vec());
        }
        for i in 0..5000u32 {
            assert_eq!(rx.recv().await.unwrap(), i.to_be_bytes().to_vec());
        }
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let broker = MemoryBroker::new("CnC", "CnC_Res", 1);
        let gone = broker.subscribe_responses();
        let mut kept = broker.subscribe_responses();
        drop(gone);
        broker.publish(b"done".to_vec());
        assert_eq!(broker.responses.lock().len(), 1);
        assert_eq!(kept.recv().await.unwrap(), b"done".to_vec());
    }

    #[tokio::test]
    async fn test_responses_fan_out() {
        let broker = MemoryBroker::new("CnC", "CnC_Res", 1);
        let mut a = broker.subscribe_responses();
        let mut b = broker.subscribe_responses();
        broker.publish(b"done".to_vec());
        assert_eq!(a.recv().await.unwrap(), b"done".to_vec());
        assert_eq!(b.recv().await.unwrap(), b"done".to_vec());
    }
}
