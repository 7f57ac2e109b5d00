//! Shard consumer loop
//!
//! Feeds the ShardActor from two sources and publishes what it answers:
//!
//! ```text
//! partition records ─┐
//!                    ├─► ShardActor ──Answered──► response topic
//! relay inbox ───────┘        │
//!                             └─Relayed──► owner's relay inbox
//! ```

use super::actor::ShardActor;
use super::messages::{Disposition, Inbound};
use crate::broker::{ConsumerRecord, ResponsePublisher};
use cgw_core::{CommandEnvelope, ShardId};
use kameo::prelude::*;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct ShardConsumer {
    shard_id: ShardId,
    actor: ActorRef<ShardActor>,
    records: mpsc::UnboundedReceiver<ConsumerRecord>,
    relays: mpsc::UnboundedReceiver<Inbound>,
    publisher: Arc<dyn ResponsePublisher>,
    shutdown: watch::Receiver<bool>,
}

impl ShardConsumer {
    pub fn new(
        shard_id: ShardId,
        actor: ActorRef<ShardActor>,
        records: mpsc::UnboundedReceiver<ConsumerRecord>,
        relays: mpsc::UnboundedReceiver<Inbound>,
        publisher: Arc<dyn ResponsePublisher>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            shard_id,
            actor,
            records,
            relays,
            publisher,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Consume until shutdown is signalled or both sources close.
    pub async fn run(mut self) {
        info!(shard_id = self.shard_id, "Starting shard consumer");

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }

                Some(record) = self.records.recv() => {
                    self.on_record(record).await;
                }

                Some(inbound) = self.relays.recv() => {
                    self.dispatch(inbound).await;
                }

                else => break,
            }
        }

        info!(shard_id = self.shard_id, "Shard consumer stopped");
    }

    async fn on_record(&self, record: ConsumerRecord) {
        match CommandEnvelope::from_slice(&record.payload) {
            Ok(command) => self.dispatch(Inbound::consumed(command, record.partition)).await,
            Err(e) => {
                warn!(
                    shard_id = self.shard_id,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Skipping undecodable command"
                );
            }
        }
    }

    async fn dispatch(&self, inbound: Inbound) {
        let uuid = inbound.command.uuid;
        match self.actor.ask(inbound).send().await {
            Ok(Disposition::Answered(response)) => match response.to_vec() {
                Ok(payload) => self.publisher.publish(payload),
                Err(e) => error!(shard_id = self.shard_id, uuid = %uuid, error = %e, "Failed to encode response"),
            },
            Ok(Disposition::Relayed(target)) => {
                debug!(shard_id = self.shard_id, uuid = %uuid, target_shard_id = target, "Left to owner");
            }
            Ok(Disposition::Aborted { .. }) => {}
            Err(e) => {
                error!(shard_id = self.shard_id, uuid = %uuid, error = %e, "ShardActor unreachable");
            }
        }
    }
}
