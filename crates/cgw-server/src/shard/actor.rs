//! ShardActor Implementation
//!
//! One actor per shard. It handles inbound commands one at a time, so every
//! command for a group owned by this shard is linearized.

use super::messages::{Disposition, GetShardStats, Inbound, ShardStats, TopologyAck, TopologyChanged};
use super::processor::CommandProcessor;
use super::relay::{self, Route, ShardDirectory};
use crate::observability::{events, ShardMetrics};
use cgw_core::{ResponseEnvelope, ShardId};
use kameo::{
    message::{Context, Message},
    Actor,
};
use tracing::{debug, info};

/// Routes, relays and applies the commands reaching one shard.
#[derive(Actor)]
pub struct ShardActor {
    shard_id: ShardId,
    processor: CommandProcessor,
    directory: ShardDirectory,
    metrics: ShardMetrics,
    /// Live shards as of the last topology change
    active_shards: Vec<ShardId>,
    commands_answered: u64,
    commands_relayed: u64,
    commands_aborted: u64,
}

impl ShardActor {
    pub fn new(processor: CommandProcessor, directory: ShardDirectory, metrics: ShardMetrics) -> Self {
        let shard_id = processor.shard_id();
        info!(shard_id, "Creating ShardActor");
        Self {
            shard_id,
            processor,
            directory,
            metrics,
            active_shards: Vec::new(),
            commands_answered: 0,
            commands_relayed: 0,
            commands_aborted: 0,
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    fn abort(&mut self, inbound: &Inbound, error: impl ToString) -> Disposition {
        let reason = error.to_string();
        let cmd = &inbound.command;
        events::command_aborted(self.shard_id, cmd.kind, cmd.infra_group_id, &cmd.uuid, &reason);
        self.commands_aborted += 1;
        Disposition::Aborted { reason }
    }

    fn answer(&mut self, response: ResponseEnvelope) -> Disposition {
        self.commands_answered += 1;
        Disposition::Answered(response)
    }
}

impl Message<Inbound> for ShardActor {
    type Reply = Disposition;

    async fn handle(&mut self, msg: Inbound, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let cmd = &msg.command;
        debug!(
            shard_id = self.shard_id,
            kind = %cmd.kind,
            group_id = cmd.infra_group_id,
            uuid = %cmd.uuid,
            partition = ?msg.partition,
            relayed_from = ?msg.relayed_from,
            "Handling command"
        );

        let route = match relay::route(self.processor.table(), cmd, msg.relayed_from).await {
            Ok(route) => route,
            Err(e) => return self.abort(&msg, e),
        };

        match route {
            Route::Local => match self.processor.process(cmd).await {
                Ok(response) => self.answer(response),
                Err(e) => self.abort(&msg, e),
            },
            Route::Relay(target) => match self.directory.relay(self.shard_id, target, cmd.clone()) {
                Ok(()) => {
                    events::command_relayed(self.shard_id, target, cmd.kind, cmd.infra_group_id, &cmd.uuid);
                    self.commands_relayed += 1;
                    Disposition::Relayed(target)
                }
                Err(e) => {
                    let reason = e.to_string();
                    events::command_rejected(self.shard_id, cmd.kind, cmd.infra_group_id, &cmd.uuid, &reason);
                    let response = ResponseEnvelope::failure(cmd, self.shard_id, reason);
                    self.answer(response)
                }
            },
            Route::Reject(reason) => {
                events::command_rejected(self.shard_id, cmd.kind, cmd.infra_group_id, &cmd.uuid, &reason);
                let response = ResponseEnvelope::failure(cmd, self.shard_id, reason);
                self.answer(response)
            }
        }
    }
}

impl Message<TopologyChanged> for ShardActor {
    type Reply = TopologyAck;

    async fn handle(&mut self, msg: TopologyChanged, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let previous_count = self.active_shards.len();
        let mut shards = msg.shards;
        shards.sort_unstable();
        shards.dedup();
        let new_count = shards.len();

        if shards != self.active_shards {
            events::topology_changed(self.shard_id, previous_count, new_count);
        }
        self.active_shards = shards;
        self.metrics.set_active_shards(new_count);

        TopologyAck {
            previous_count,
            new_count,
        }
    }
}

impl Message<GetShardStats> for ShardActor {
    type Reply = ShardStats;

    async fn handle(&mut self, _msg: GetShardStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let limits = self.processor.limits();
        ShardStats {
            shard_id: self.shard_id,
            assigned_groups_num: self.processor.assigned_groups(),
            groups_capacity: limits.groups_capacity,
            groups_threshold: limits.groups_threshold,
            group_infras_capacity: limits.group_infras_capacity,
            active_shards: self.active_shards.clone(),
            commands_answered: self.commands_answered,
            commands_relayed: self.commands_relayed,
            commands_aborted: self.commands_aborted,
        }
    }
}
