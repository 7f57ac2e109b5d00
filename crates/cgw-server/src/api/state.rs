//! Application State
//!
//! Shared state passed to all API handlers of one shard.

use crate::client::CommandClient;
use crate::observability::ShardMetrics;
use crate::shard::ShardActor;
use crate::sharding::OwnershipTable;
use cgw_core::ShardId;
use kameo::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub shard_id: ShardId,
    pub shard_ref: ActorRef<ShardActor>,
    pub table: OwnershipTable,
    pub metrics: ShardMetrics,
    /// Client used by `POST /commands`
    pub client: Arc<CommandClient>,
    /// Set once the shard has restored its state and joined the topology
    pub readiness: Arc<AtomicBool>,
}
