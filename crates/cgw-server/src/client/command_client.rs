//! Command client
//!
//! Produces commands and waits for the matching response. Responses are
//! matched by uuid through a pending-request table filled by a dispatcher task
//! reading the response topic. The caller owns the timeout; on expiry the
//! pending entry is dropped and a late response counts as stray.

use crate::broker::{BrokerError, CommandProducer, ProducerRecord};
use cgw_core::{CommandEnvelope, Partition, ResponseEnvelope, ShardId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("a command with uuid {0} is already pending")]
    DuplicateUuid(Uuid),
    #[error("no response for {uuid} within {timeout:?}")]
    Timeout { uuid: Uuid, timeout: Duration },
    #[error("response topic closed while waiting for {0}")]
    Closed(Uuid),
}

/// Where a command is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    /// Partition chosen by the hash of the group id
    Key,
    Partition(Partition),
    /// First partition currently consumed by this shard
    Shard(ShardId),
}

type PendingTable = Arc<Mutex<HashMap<Uuid, oneshot::Sender<ResponseEnvelope>>>>;

pub struct CommandClient {
    producer: Arc<dyn CommandProducer>,
    pending: PendingTable,
    stray: Arc<AtomicU64>,
    timeout: Duration,
    dispatcher: JoinHandle<()>,
}

impl CommandClient {
    pub fn new(
        producer: Arc<dyn CommandProducer>,
        responses: mpsc::UnboundedReceiver<Vec<u8>>,
        timeout: Duration,
    ) -> Self {
        let pending: PendingTable = Arc::default();
        let stray = Arc::new(AtomicU64::new(0));
        let dispatcher = spawn_dispatcher(responses, pending.clone(), stray.clone());
        Self {
            producer,
            pending,
            stray,
            timeout,
            dispatcher,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Responses that matched no pending command (late or duplicate).
    pub fn stray_responses(&self) -> u64 {
        self.stray.load(Ordering::SeqCst)
    }

    /// Partitions currently consumed by `shard_id`.
    pub fn partitions_for_shard(&self, shard_id: ShardId) -> Vec<Partition> {
        self.producer.partitions_for_shard(shard_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Partition `target` resolves to, `None` for key hashing.
    pub fn resolve_partition(&self, target: SendTarget) -> Result<Option<Partition>, BrokerError> {
        match target {
            SendTarget::Key => Ok(None),
            SendTarget::Partition(p) => Ok(Some(p)),
            SendTarget::Shard(shard_id) => self
                .producer
                .partitions_for_shard(shard_id)
                .first()
                .copied()
                .map(Some)
                .ok_or(BrokerError::NoPartitionForShard(shard_id)),
        }
    }

    pub async fn send(&self, cmd: &CommandEnvelope, target: SendTarget) -> Result<ResponseEnvelope, ClientError> {
        self.send_with_timeout(cmd, target, self.timeout).await
    }

    pub async fn send_with_timeout(
        &self,
        cmd: &CommandEnvelope,
        target: SendTarget,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, ClientError> {
        let uuid = cmd.uuid;
        let partition = self.resolve_partition(target)?;
        let payload = cmd.to_vec()?;

        let rx = {
            let mut pending = self.pending.lock();
            if pending.contains_key(&uuid) {
                return Err(ClientError::DuplicateUuid(uuid));
            }
            let (tx, rx) = oneshot::channel();
            pending.insert(uuid, tx);
            rx
        };

        let record = ProducerRecord {
            key: cmd.partition_key(),
            payload,
            partition,
        };
        match self.producer.send(record) {
            Ok(p) => debug!(uuid = %uuid, partition = p, kind = %cmd.kind, "Command produced"),
            Err(e) => {
                self.pending.lock().remove(&uuid);
                return Err(e.into());
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::Closed(uuid)),
            Err(_) => {
                self.pending.lock().remove(&uuid);
                Err(ClientError::Timeout { uuid, timeout })
            }
        }
    }
}

impl Drop for CommandClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

fn spawn_dispatcher(
    mut responses: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: PendingTable,
    stray: Arc<AtomicU64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = responses.recv().await {
            let response = match ResponseEnvelope::from_slice(&payload) {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "Undecodable response");
                    continue;
                }
            };

            let waiter = pending.lock().remove(&response.uuid);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => {
                    debug!(uuid = %response.uuid, "Stray response");
                    stray.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        // Dropping the table's senders wakes every waiter with `Closed`.
        pending.lock().clear();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, ResponsePublisher};

    fn client(broker: &Arc<MemoryBroker>, timeout: Duration) -> CommandClient {
        CommandClient::new(broker.clone(), broker.subscribe_responses(), timeout)
    }

    #[tokio::test]
    async fn test_response_matched_by_uuid() {
        let broker = Arc::new(MemoryBroker::new("CnC", "CnC_Res", 1));
        let mut records = broker.subscribe(0);
        broker.rebalance(vec![0]);
        let client = client(&broker, Duration::from_secs(5));

        let responder = {
            let broker = broker.clone();
            tokio::spawn(async move {
                let record = records.recv().await.unwrap();
                let cmd = CommandEnvelope::from_slice(&record.payload).unwrap();
                let other = CommandEnvelope::group_create(cmd.infra_group_id, Uuid::new_v4());
                broker.publish(ResponseEnvelope::ok(&other, 0).to_vec().unwrap());
                broker.publish(ResponseEnvelope::ok(&cmd, 0).to_vec().unwrap());
            })
        };

        let cmd = CommandEnvelope::group_create(1, Uuid::new_v4());
        let response = client.send(&cmd, SendTarget::Key).await.unwrap();
        responder.await.unwrap();
        assert_eq!(response.uuid, cmd.uuid);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_burst_reaches_every_caller() {
        const BURST: usize = 1500;
        let broker = Arc::new(MemoryBroker::new("CnC", "CnC_Res", 1));
        let mut records = broker.subscribe(0);
        broker.rebalance(vec![0]);
        let client = Arc::new(client(&broker, Duration::from_secs(10)));

        let callers: Vec<_> = (0..BURST)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move {
                    let cmd = CommandEnvelope::group_create(i as i32, Uuid::new_v4());
                    client.send(&cmd, SendTarget::Partition(0)).await
                })
            })
            .collect();

        // Every caller is registered once its record is on the topic.
        let mut commands = Vec::with_capacity(BURST);
        for _ in 0..BURST {
            let record = records.recv().await.unwrap();
            commands.push(CommandEnvelope::from_slice(&record.payload).unwrap());
        }
        for cmd in &commands {
            broker.publish(ResponseEnvelope::ok(cmd, 0).to_vec().unwrap());
        }

        for caller in callers {
            assert!(caller.await.unwrap().unwrap().success);
        }
        assert_eq!(client.stray_responses(), 0);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_clears_pending_entry() {
        let broker = Arc::new(MemoryBroker::new("CnC", "CnC_Res", 1));
        let client = client(&broker, Duration::from_millis(50));
        let cmd = CommandEnvelope::group_delete(1, Uuid::new_v4());

        let err = client.send(&cmd, SendTarget::Partition(0)).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { uuid, .. } if uuid == cmd.uuid));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_shard_target_without_partitions() {
        let broker = Arc::new(MemoryBroker::new("CnC", "CnC_Res", 1));
        let client = client(&broker, Duration::from_millis(50));
        let cmd = CommandEnvelope::group_delete(1, Uuid::new_v4());
        assert!(matches!(
            client.send(&cmd, SendTarget::Shard(3)).await,
            Err(ClientError::Broker(BrokerError::NoPartitionForShard(3)))
        ));
    }
}
