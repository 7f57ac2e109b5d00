//! In-memory store backends
//!
//! Used by the local cluster runtime and the test suite. A single
//! `MemoryDurableStore` is shared by every shard of a cluster, exactly like a
//! real etcd cluster would be. Locks are never held across an await point.

use super::{CacheStore, DurableStore, StoreError, StoreResult};
use crate::models::{GroupRecord, InfraRecord, Insert, ShardRecord};
use async_trait::async_trait;
use cgw_core::{GroupId, InfraMac, ShardId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct DurableTables {
    shards: BTreeSet<ShardId>,
    groups: BTreeMap<GroupId, GroupRecord>,
    infras: BTreeMap<InfraMac, InfraRecord>,
}

/// Durable store kept in process memory.
///
/// `set_unavailable(true)` makes every call fail with
/// [`StoreError::Unavailable`], which is how tests simulate losing the
/// connection to the system of record.
#[derive(Default)]
pub struct MemoryDurableStore {
    tables: RwLock<DurableTables>,
    unavailable: AtomicBool,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("durable store is unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn register_shard(&self, shard_id: ShardId) -> StoreResult<()> {
        self.check()?;
        self.tables.write().shards.insert(shard_id);
        Ok(())
    }

    async fn deregister_shard(&self, shard_id: ShardId) -> StoreResult<()> {
        self.check()?;
        self.tables.write().shards.remove(&shard_id);
        Ok(())
    }

    async fn active_shards(&self) -> StoreResult<Vec<ShardId>> {
        self.check()?;
        Ok(self.tables.read().shards.iter().copied().collect())
    }

    async fn insert_group(&self, group: &GroupRecord) -> StoreResult<Insert<GroupRecord>> {
        self.check()?;
        let mut tables = self.tables.write();
        if let Some(existing) = tables.groups.get(&group.gid) {
            return Ok(Insert::Exists(existing.clone()));
        }
        tables.groups.insert(group.gid, group.clone());
        Ok(Insert::Created)
    }

    async fn get_group(&self, gid: GroupId) -> StoreResult<Option<GroupRecord>> {
        self.check()?;
        Ok(self.tables.read().groups.get(&gid).cloned())
    }

    async fn update_group(&self, group: &GroupRecord) -> StoreResult<()> {
        self.check()?;
        self.tables.write().groups.insert(group.gid, group.clone());
        Ok(())
    }

    async fn delete_group(&self, gid: GroupId) -> StoreResult<bool> {
        self.check()?;
        Ok(self.tables.write().groups.remove(&gid).is_some())
    }

    async fn list_groups(&self) -> StoreResult<Vec<GroupRecord>> {
        self.check()?;
        Ok(self.tables.read().groups.values().cloned().collect())
    }

    async fn insert_infra(&self, infra: &InfraRecord) -> StoreResult<Insert<InfraRecord>> {
        self.check()?;
        let mut tables = self.tables.write();
        if let Some(existing) = tables.infras.get(&infra.mac) {
            return Ok(Insert::Exists(existing.clone()));
        }
        tables.infras.insert(infra.mac, infra.clone());
        Ok(Insert::Created)
    }

    async fn get_infra(&self, mac: &InfraMac) -> StoreResult<Option<InfraRecord>> {
        self.check()?;
        Ok(self.tables.read().infras.get(mac).cloned())
    }

    async fn delete_infra(&self, mac: &InfraMac) -> StoreResult<bool> {
        self.check()?;
        Ok(self.tables.write().infras.remove(mac).is_some())
    }

    async fn list_infras(&self, gid: GroupId) -> StoreResult<Vec<InfraRecord>> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .infras
            .values()
            .filter(|infra| infra.group_id == gid)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct CacheTables {
    groups: HashMap<GroupId, GroupRecord>,
    shards: HashMap<ShardId, ShardRecord>,
    infras: HashMap<(ShardId, InfraMac), InfraRecord>,
}

/// Cache projection kept in process memory.
#[derive(Default)]
pub struct MemoryCache {
    tables: RwLock<CacheTables>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry. The next lookups fall back to the durable store.
    pub fn clear(&self) {
        let mut tables = self.tables.write();
        tables.groups.clear();
        tables.shards.clear();
        tables.infras.clear();
    }

    /// Number of cached infra entries owned by `shard_id`.
    pub fn infra_count(&self, shard_id: ShardId) -> usize {
        self.tables
            .read()
            .infras
            .keys()
            .filter(|(shard, _)| *shard == shard_id)
            .count()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn put_group(&self, group: &GroupRecord) -> StoreResult<()> {
        self.tables.write().groups.insert(group.gid, group.clone());
        Ok(())
    }

    async fn get_group(&self, gid: GroupId) -> StoreResult<Option<GroupRecord>> {
        Ok(self.tables.read().groups.get(&gid).cloned())
    }

    async fn remove_group(&self, gid: GroupId) -> StoreResult<()> {
        self.tables.write().groups.remove(&gid);
        Ok(())
    }

    async fn put_shard(&self, shard: &ShardRecord) -> StoreResult<()> {
        self.tables.write().shards.insert(shard.id, shard.clone());
        Ok(())
    }

    async fn get_shard(&self, shard_id: ShardId) -> StoreResult<Option<ShardRecord>> {
        Ok(self.tables.read().shards.get(&shard_id).cloned())
    }

    async fn remove_shard(&self, shard_id: ShardId) -> StoreResult<()> {
        self.tables.write().shards.remove(&shard_id);
        Ok(())
    }

    async fn put_infra(&self, infra: &InfraRecord) -> StoreResult<()> {
        self.tables
            .write()
            .infras
            .insert((infra.shard_id, infra.mac), infra.clone());
        Ok(())
    }

    async fn get_infra(&self, shard_id: ShardId, mac: &InfraMac) -> StoreResult<Option<InfraRecord>> {
        Ok(self.tables.read().infras.get(&(shard_id, *mac)).cloned())
    }

    async fn remove_infra(&self, shard_id: ShardId, mac: &InfraMac) -> StoreResult<()> {
        self.tables.write().infras.remove(&(shard_id, *mac));
        Ok(())
    }
}
