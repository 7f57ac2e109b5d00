//! Shard Ownership Table
//!
//! Which shard owns which group. The durable store decides; the cache is read
//! first and repaired from the durable store on a miss.

use crate::models::{GroupRecord, Insert, ShardRecord};
use crate::store::{CacheStore, DurableStore, StoreResult};
use cgw_core::{GroupId, ShardId};
use std::sync::Arc;
use tracing::debug;

/// Ownership view of one shard over the shared stores.
#[derive(Clone)]
pub struct OwnershipTable {
    shard_id: ShardId,
    durable: Arc<dyn DurableStore>,
    cache: Arc<dyn CacheStore>,
}

impl OwnershipTable {
    pub fn new(shard_id: ShardId, durable: Arc<dyn DurableStore>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            shard_id,
            durable,
            cache,
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Current record of `gid`, cache first.
    pub async fn lookup(&self, gid: GroupId) -> StoreResult<Option<GroupRecord>> {
        if let Some(group) = self.cache.get_group(gid).await? {
            return Ok(Some(group));
        }
        let Some(group) = self.durable.get_group(gid).await? else {
            return Ok(None);
        };
        debug!(shard_id = self.shard_id, group_id = gid, owner = group.shard_id, "Repairing cached group");
        self.cache.put_group(&group).await?;
        Ok(Some(group))
    }

    /// Owner shard of `gid`, if the group exists.
    pub async fn resolve_owner(&self, gid: GroupId) -> StoreResult<Option<ShardId>> {
        Ok(self.lookup(gid).await?.map(|group| group.shard_id))
    }

    /// Claim `group` for its shard. The durable create-if-absent write decides
    /// between concurrent claims; the cache is only written by the winner.
    pub async fn register_owner(&self, group: &GroupRecord) -> StoreResult<Insert<GroupRecord>> {
        let outcome = self.durable.insert_group(group).await?;
        if outcome.is_created() {
            self.cache.put_group(group).await?;
        }
        Ok(outcome)
    }

    /// Write an updated record through both stores.
    pub async fn update(&self, group: &GroupRecord) -> StoreResult<()> {
        self.durable.update_group(group).await?;
        self.cache.put_group(group).await
    }

    /// Drop the mapping for `gid`, durable first.
    pub async fn release(&self, gid: GroupId) -> StoreResult<bool> {
        let removed = self.durable.delete_group(gid).await?;
        self.cache.remove_group(gid).await?;
        Ok(removed)
    }

    /// Groups owned by this shard according to the durable store.
    pub async fn owned_groups(&self) -> StoreResult<Vec<GroupRecord>> {
        Ok(self
            .durable
            .list_groups()
            .await?
            .into_iter()
            .filter(|group| group.shard_id == self.shard_id)
            .collect())
    }

    pub async fn store_shard_record(&self, record: &ShardRecord) -> StoreResult<()> {
        self.cache.put_shard(record).await
    }

    pub async fn active_shards(&self) -> StoreResult<Vec<ShardId>> {
        self.durable.active_shards().await
    }
}
