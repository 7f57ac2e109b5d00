//! Relay Engine
//!
//! Decides whether a shard handles a command itself, forwards it to the
//! owning shard, or rejects it, and carries forwarded commands between shards.
//!
//! A relayed command is delivered unchanged (same uuid) to the owner's inbox.
//! The forwarding shard never answers it. A command is relayed at most once:
//! if it reaches a shard that is still not the owner, that shard rejects it.

use super::messages::Inbound;
use crate::sharding::OwnershipTable;
use crate::store::StoreResult;
use cgw_core::{CommandEnvelope, ShardId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("shard {0} is not available")]
    ShardUnavailable(ShardId),
}

/// Where an inbound command is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Local,
    Relay(ShardId),
    /// Answer `success=false` with this message
    Reject(String),
}

/// Route `cmd` on shard `table.shard_id()`.
pub async fn route(
    table: &OwnershipTable,
    cmd: &CommandEnvelope,
    relayed_from: Option<ShardId>,
) -> StoreResult<Route> {
    let local = table.shard_id();

    if cmd.kind.is_create() {
        return Ok(match cmd.target_shard() {
            Some(target) if target != local && relayed_from.is_none() => Route::Relay(target),
            Some(target) if target != local => Route::Reject(format!(
                "group {} was requested on shard {target} but reached shard {local}",
                cmd.infra_group_id
            )),
            _ => Route::Local,
        });
    }

    Ok(match table.resolve_owner(cmd.infra_group_id).await? {
        None => Route::Reject(format!("group {} not found", cmd.infra_group_id)),
        Some(owner) if owner == local => Route::Local,
        Some(owner) if relayed_from.is_some() => Route::Reject(format!(
            "group {} is owned by shard {owner}, not shard {local}",
            cmd.infra_group_id
        )),
        Some(owner) => Route::Relay(owner),
    })
}

/// Relay inboxes of the shards running in this process.
#[derive(Clone, Default)]
pub struct ShardDirectory {
    inboxes: Arc<RwLock<HashMap<ShardId, mpsc::UnboundedSender<Inbound>>>>,
}

impl ShardDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the relay inbox of `shard_id`, replacing any previous one.
    pub fn register(&self, shard_id: ShardId) -> mpsc::UnboundedReceiver<Inbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.write().insert(shard_id, tx);
        rx
    }

    pub fn deregister(&self, shard_id: ShardId) {
        self.inboxes.write().remove(&shard_id);
    }

    pub fn is_live(&self, shard_id: ShardId) -> bool {
        self.inboxes
            .read()
            .get(&shard_id)
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn live_shards(&self) -> Vec<ShardId> {
        let mut shards: Vec<ShardId> = self
            .inboxes
            .read()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(id, _)| *id)
            .collect();
        shards.sort_unstable();
        shards
    }

    /// Forward `command` from `from` to `target`. Never blocks.
    pub fn relay(&self, from: ShardId, target: ShardId, command: CommandEnvelope) -> Result<(), RelayError> {
        let inboxes = self.inboxes.read();
        let tx = inboxes.get(&target).ok_or(RelayError::ShardUnavailable(target))?;
        tx.send(Inbound::relayed(command, from))
            .map_err(|_| RelayError::ShardUnavailable(target))?;
        debug!(shard_id = from, target_shard_id = target, "Command placed in relay inbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GroupRecord;
    use crate::store::{DurableStore, MemoryCache, MemoryDurableStore};
    use uuid::Uuid;

    async fn table_with_group(local: ShardId, gid: i32, owner: ShardId) -> OwnershipTable {
        let durable = Arc::new(MemoryDurableStore::new());
        durable
            .insert_group(&GroupRecord::new(gid, owner, Uuid::new_v4()))
            .await
            .unwrap();
        OwnershipTable::new(local, durable, Arc::new(MemoryCache::new()))
    }

    #[tokio::test]
    async fn test_create_routes_by_target() {
        let table = table_with_group(1, 0, 0).await;
        let any = CommandEnvelope::group_create(100, Uuid::new_v4());
        let to_self = CommandEnvelope::group_create_to_shard(100, 1, Uuid::new_v4());
        let to_other = CommandEnvelope::group_create_to_shard(100, 0, Uuid::new_v4());

        assert_eq!(route(&table, &any, None).await.unwrap(), Route::Local);
        assert_eq!(route(&table, &to_self, None).await.unwrap(), Route::Local);
        assert_eq!(route(&table, &to_other, None).await.unwrap(), Route::Relay(0));
    }

    #[tokio::test]
    async fn test_existing_group_routes_to_owner() {
        let table = table_with_group(1, 100, 0).await;
        let cmd = CommandEnvelope::infras_add(100, ["11-22-33-44-55-66"], Uuid::new_v4());
        assert_eq!(route(&table, &cmd, None).await.unwrap(), Route::Relay(0));

        let local = table_with_group(0, 100, 0).await;
        assert_eq!(route(&local, &cmd, None).await.unwrap(), Route::Local);
    }

    #[tokio::test]
    async fn test_missing_group_rejected() {
        let table = table_with_group(0, 1, 0).await;
        let cmd = CommandEnvelope::group_delete(2, Uuid::new_v4());
        assert_eq!(
            route(&table, &cmd, None).await.unwrap(),
            Route::Reject("group 2 not found".into())
        );
    }

    #[tokio::test]
    async fn test_relayed_command_is_not_relayed_again() {
        let table = table_with_group(1, 100, 2).await;
        let cmd = CommandEnvelope::group_delete(100, Uuid::new_v4());
        assert!(matches!(
            route(&table, &cmd, Some(0)).await.unwrap(),
            Route::Reject(_)
        ));
    }

    #[tokio::test]
    async fn test_relay_to_missing_shard_fails() {
        let directory = ShardDirectory::new();
        let cmd = CommandEnvelope::group_create(1, Uuid::new_v4());
        assert_eq!(
            directory.relay(1, 0, cmd.clone()),
            Err(RelayError::ShardUnavailable(0))
        );
        assert_eq!(
            RelayError::ShardUnavailable(0).to_string(),
            "shard 0 is not available"
        );

        let mut rx = directory.register(0);
        directory.relay(1, 0, cmd.clone()).unwrap();
        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.command, cmd);
        assert_eq!(inbound.relayed_from, Some(1));

        drop(rx);
        assert!(!directory.is_live(0));
        assert!(directory.relay(1, 0, cmd).is_err());
    }
}
