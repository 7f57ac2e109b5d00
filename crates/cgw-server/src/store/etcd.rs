//! Etcd durable store
//!
//! Key layout:
//!
//! ```text
//! /cgw/v1/shards/{id}                    -> ShardId      (bound to a lease)
//! /cgw/v1/groups/{gid}                   -> GroupRecord
//! /cgw/v1/infras/{mac}                   -> InfraRecord
//! /cgw/v1/group_infras/{gid}/{mac}       -> InfraRecord  (secondary index)
//! ```
//!
//! Create-if-absent writes are transactions comparing the key's version with
//! zero. The shard registration lease is kept alive by a background task; if
//! the process dies the key disappears after the TTL.

use super::{DurableStore, StoreError, StoreResult};
use crate::config::ShardConfig;
use crate::models::{GroupRecord, InfraRecord, Insert};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use cgw_core::{GroupId, InfraMac, ShardId};
use etcd_client::{
    Client, Compare, CompareOp, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions, Txn,
    TxnOp, TxnOpResponse,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const PREFIX: &str = "/cgw/v1";

mod keys {
    use super::PREFIX;
    use cgw_core::{GroupId, InfraMac, ShardId};

    pub fn shards_prefix() -> String {
        format!("{PREFIX}/shards/")
    }

    pub fn shard(id: ShardId) -> String {
        format!("{PREFIX}/shards/{id}")
    }

    pub fn groups_prefix() -> String {
        format!("{PREFIX}/groups/")
    }

    pub fn group(gid: GroupId) -> String {
        format!("{PREFIX}/groups/{gid}")
    }

    pub fn infra(mac: &InfraMac) -> String {
        format!("{PREFIX}/infras/{mac}")
    }

    pub fn group_infras_prefix(gid: GroupId) -> String {
        format!("{PREFIX}/group_infras/{gid}/")
    }

    pub fn group_infra(gid: GroupId, mac: &InfraMac) -> String {
        format!("{PREFIX}/group_infras/{gid}/{mac}")
    }
}

struct Registration {
    lease_id: i64,
    keepalive: JoinHandle<()>,
}

/// Durable store backed by an etcd cluster.
pub struct EtcdStore {
    client: Client,
    lease_ttl: i64,
    keepalive_interval: Duration,
    registrations: Mutex<HashMap<ShardId, Registration>>,
}

impl EtcdStore {
    /// Connect to etcd with exponential backoff.
    pub async fn connect(config: &ShardConfig) -> Result<Self> {
        let backoff = ExponentialBackoff {
            initial_interval: config.etcd_backoff_initial,
            max_interval: config.etcd_backoff_max,
            max_elapsed_time: Some(config.etcd_backoff_max_elapsed),
            multiplier: config.etcd_backoff_multiplier,
            ..Default::default()
        };

        let endpoints = config.etcd_endpoints.clone();
        let client = retry(backoff, || async {
            match Client::connect(&endpoints, None).await {
                Ok(client) => {
                    debug!(endpoints = ?endpoints, "Connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to connect to etcd after retries: {:?}", e))?;

        Ok(Self {
            client,
            lease_ttl: config.lease_ttl,
            keepalive_interval: config.keepalive_interval,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    /// etcd-client takes `&mut self`; clones share the underlying channel.
    fn client(&self) -> Client {
        self.client.clone()
    }

    async fn get_json<T: DeserializeOwned>(&self, key: String) -> StoreResult<Option<T>> {
        let resp = self.client().get(key.as_str(), None).await?;
        match resp.kvs().first() {
            Some(kv) => decode(&key, kv.value()).map(Some),
            None => Ok(None),
        }
    }

    async fn list_json<T: DeserializeOwned>(&self, prefix: String) -> StoreResult<Vec<T>> {
        let resp = self
            .client()
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await?;
        resp.kvs()
            .iter()
            .map(|kv| decode(&String::from_utf8_lossy(kv.key()), kv.value()))
            .collect()
    }

    /// Put `ops` only if `key` does not exist yet; otherwise read it back.
    async fn create_if_absent<T: DeserializeOwned>(
        &self,
        key: String,
        ops: Vec<TxnOp>,
    ) -> StoreResult<Insert<T>> {
        let txn = Txn::new()
            .when(vec![Compare::version(key.as_str(), CompareOp::Equal, 0)])
            .and_then(ops)
            .or_else(vec![TxnOp::get(key.as_str(), None)]);

        let resp = self.client().txn(txn).await?;
        if resp.succeeded() {
            return Ok(Insert::Created);
        }

        for op in resp.op_responses() {
            if let TxnOpResponse::Get(get) = op {
                if let Some(kv) = get.kvs().first() {
                    return decode(&key, kv.value()).map(Insert::Exists);
                }
            }
        }
        // Deleted between the compare and the read.
        Err(StoreError::Unavailable(format!(
            "{key} changed during create-if-absent"
        )))
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(value).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}

#[async_trait]
impl DurableStore for EtcdStore {
    async fn register_shard(&self, shard_id: ShardId) -> StoreResult<()> {
        let mut client = self.client();
        let lease = client.lease_grant(self.lease_ttl, None).await?;
        let lease_id = lease.id();

        let options = PutOptions::new().with_lease(lease_id);
        client
            .put(keys::shard(shard_id), serde_json::to_vec(&shard_id)?, Some(options))
            .await?;

        let (keeper, stream) = client.lease_keep_alive(lease_id).await?;
        let keepalive = spawn_keepalive_task(keeper, stream, lease_id, shard_id, self.keepalive_interval);

        info!(shard_id = shard_id, lease_id = lease_id, "Shard registered in etcd");

        if let Some(previous) = self
            .registrations
            .lock()
            .insert(shard_id, Registration { lease_id, keepalive })
        {
            previous.keepalive.abort();
        }
        Ok(())
    }

    async fn deregister_shard(&self, shard_id: ShardId) -> StoreResult<()> {
        let registration = self.registrations.lock().remove(&shard_id);
        let mut client = self.client();
        match registration {
            Some(registration) => {
                registration.keepalive.abort();
                // Revoking the lease deletes the shard key with it.
                client.lease_revoke(registration.lease_id).await?;
            }
            None => {
                client.delete(keys::shard(shard_id), None).await?;
            }
        }
        info!(shard_id = shard_id, "Shard deregistered from etcd");
        Ok(())
    }

    async fn active_shards(&self) -> StoreResult<Vec<ShardId>> {
        let mut shards: Vec<ShardId> = self.list_json(keys::shards_prefix()).await?;
        shards.sort_unstable();
        shards.dedup();
        Ok(shards)
    }

    async fn insert_group(&self, group: &GroupRecord) -> StoreResult<Insert<GroupRecord>> {
        let key = keys::group(group.gid);
        let value = serde_json::to_vec(group)?;
        self.create_if_absent(key.clone(), vec![TxnOp::put(key, value, None)])
            .await
    }

    async fn get_group(&self, gid: GroupId) -> StoreResult<Option<GroupRecord>> {
        self.get_json(keys::group(gid)).await
    }

    async fn update_group(&self, group: &GroupRecord) -> StoreResult<()> {
        self.client()
            .put(keys::group(group.gid), serde_json::to_vec(group)?, None)
            .await?;
        Ok(())
    }

    async fn delete_group(&self, gid: GroupId) -> StoreResult<bool> {
        let resp = self.client().delete(keys::group(gid), None).await?;
        Ok(resp.deleted() > 0)
    }

    async fn list_groups(&self) -> StoreResult<Vec<GroupRecord>> {
        self.list_json(keys::groups_prefix()).await
    }

    async fn insert_infra(&self, infra: &InfraRecord) -> StoreResult<Insert<InfraRecord>> {
        let key = keys::infra(&infra.mac);
        let value = serde_json::to_vec(infra)?;
        let ops = vec![
            TxnOp::put(key.as_str(), value.clone(), None),
            TxnOp::put(keys::group_infra(infra.group_id, &infra.mac), value, None),
        ];
        self.create_if_absent(key, ops).await
    }

    async fn get_infra(&self, mac: &InfraMac) -> StoreResult<Option<InfraRecord>> {
        self.get_json(keys::infra(mac)).await
    }

    async fn delete_infra(&self, mac: &InfraMac) -> StoreResult<bool> {
        let Some(existing) = self.get_infra(mac).await? else {
            return Ok(false);
        };
        let txn = Txn::new().and_then(vec![
            TxnOp::delete(keys::infra(mac), None),
            TxnOp::delete(keys::group_infra(existing.group_id, mac), None),
        ]);
        self.client().txn(txn).await?;
        Ok(true)
    }

    async fn list_infras(&self, gid: GroupId) -> StoreResult<Vec<InfraRecord>> {
        self.list_json(keys::group_infras_prefix(gid)).await
    }
}

impl Drop for EtcdStore {
    fn drop(&mut self) {
        for (_, registration) in self.registrations.lock().drain() {
            registration.keepalive.abort();
        }
    }
}

/// Spawn background task to send periodic keep-alive requests for the lease.
/// If keep-alive fails the shard key expires and peers stop routing to it.
fn spawn_keepalive_task(
    mut keeper: LeaseKeeper,
    mut keeper_stream: LeaseKeepAliveStream,
    lease_id: i64,
    shard_id: ShardId,
    keepalive_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(keepalive_interval);
        interval.tick().await; // Skip first immediate tick

        loop {
            interval.tick().await;

            if let Err(e) = keeper.keep_alive().await {
                error!(shard_id, lease_id, error = %e, "Keep-alive send failed");
                break;
            }

            match keeper_stream.message().await {
                Ok(Some(resp)) => {
                    trace!(shard_id, lease_id, ttl = resp.ttl(), "Keep-alive OK");
                }
                Ok(None) => {
                    error!(shard_id, lease_id, "Keep-alive stream closed");
                    break;
                }
                Err(e) => {
                    error!(shard_id, lease_id, error = %e, "Keep-alive failed");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn test_key_layout() {
        let mac = "11:22:33:44:55:66".parse().unwrap();
        assert_eq!(keys::group(100), "/cgw/v1/groups/100");
        assert_eq!(keys::shard(2), "/cgw/v1/shards/2");
        assert_eq!(keys::infra(&mac), "/cgw/v1/infras/11-22-33-44-55-66");
        assert_eq!(
            keys::group_infra(100, &mac),
            "/cgw/v1/group_infras/100/11-22-33-44-55-66"
        );
        assert!(keys::group_infra(100, &mac).starts_with(&keys::group_infras_prefix(100)));
        // Prefix of group 1 must not match group 10.
        assert!(!keys::group_infra(10, &mac).starts_with(&keys::group_infras_prefix(1)));
    }
}
