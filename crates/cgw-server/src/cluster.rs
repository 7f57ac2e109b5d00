//! Local Cluster Runtime
//!
//! Runs several shards inside one process around a [`MemoryBroker`], a
//! shared durable store and a shared cache. Used by the binary and by the
//! integration tests.
//!
//! Shard startup order:
//! 1. bind the API listener
//! 2. register in the durable store
//! 3. restore owned groups into the cache projection
//! 4. open the relay inbox and spawn the actor, consumer and API server
//! 5. rebalance partitions over the live shards and mark ready
//!
//! Steps 4 and 5 cannot fail; a failure in 2 or 3 withdraws the registration,
//! so a shard is either fully started or invisible to the others.

use crate::api::{self, AppState};
use crate::broker::MemoryBroker;
use crate::client::CommandClient;
use crate::config::ShardConfig;
use crate::observability::{events, ShardMetrics};
use crate::shard::{CommandProcessor, ShardActor, ShardConsumer, ShardDirectory, TopologyChanged};
use crate::sharding::OwnershipTable;
use crate::store::{CacheStore, DurableStore, MemoryCache};
use anyhow::{anyhow, bail, Context, Result};
use cgw_core::{Partition, ShardId};
use futures::future::try_join_all;
use kameo::prelude::*;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How shards expose their HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    Disabled,
    /// Shard `n` listens on `base` with port `base.port() + n`; port 0 picks
    /// an ephemeral port for every shard.
    Listen(SocketAddr),
}

struct ShardHandle {
    actor: ActorRef<ShardActor>,
    consumer: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    state: AppState,
    http: Option<(SocketAddr, JoinHandle<()>)>,
}

pub struct LocalCluster {
    config: ShardConfig,
    http_mode: HttpMode,
    broker: Arc<MemoryBroker>,
    durable: Arc<dyn DurableStore>,
    cache: Arc<MemoryCache>,
    directory: ShardDirectory,
    client: Arc<CommandClient>,
    shards: BTreeMap<ShardId, ShardHandle>,
}

impl LocalCluster {
    /// Start `shard_ids` over `durable`.
    pub async fn start(
        config: ShardConfig,
        durable: Arc<dyn DurableStore>,
        shard_ids: &[ShardId],
        http_mode: HttpMode,
    ) -> Result<Self> {
        let broker = Arc::new(MemoryBroker::from_config(&config));
        let client = Arc::new(CommandClient::new(
            broker.clone(),
            broker.subscribe_responses(),
            config.command_timeout,
        ));

        info!(
            shards = ?shard_ids,
            partitions = config.partitions_num,
            command_topic = %broker.command_topic(),
            consumer_group = %broker.consumer_group(),
            response_topic = %broker.response_topic(),
            "Starting local cluster"
        );

        let mut cluster = Self {
            config,
            http_mode,
            broker,
            durable,
            cache: Arc::new(MemoryCache::new()),
            directory: ShardDirectory::new(),
            client,
            shards: BTreeMap::new(),
        };

        for &shard_id in shard_ids {
            cluster.spawn_shard(shard_id).await?;
        }
        cluster.refresh_topology().await?;
        Ok(cluster)
    }

    async fn spawn_shard(&mut self, shard_id: ShardId) -> Result<()> {
        if self.shards.contains_key(&shard_id) {
            bail!("shard {shard_id} is already running");
        }
        let config = self.config.for_shard(shard_id);
        let limits = config.limits();

        let listener = self.bind_http(shard_id).await?;

        self.durable
            .register_shard(shard_id)
            .await
            .with_context(|| format!("failed to register shard {shard_id}"))?;

        let metrics = ShardMetrics::new(&limits);
        let cache: Arc<dyn CacheStore> = self.cache.clone();
        let table = OwnershipTable::new(shard_id, self.durable.clone(), cache);
        let mut processor = CommandProcessor::new(table.clone(), limits, metrics.clone());
        let restored = match processor.restore().await {
            Ok(restored) => restored,
            Err(e) => {
                if let Err(e) = self.durable.deregister_shard(shard_id).await {
                    warn!(shard_id, error = %e, "Failed to withdraw registration");
                }
                return Err(anyhow!(e).context(format!("failed to restore shard {shard_id}")));
            }
        };
        events::shard_registered(shard_id, restored);

        let relays = self.directory.register(shard_id);
        let actor = ShardActor::spawn(ShardActor::new(processor, self.directory.clone(), metrics.clone()));

        let records = self.broker.subscribe(shard_id);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let consumer = ShardConsumer::new(
            shard_id,
            actor.clone(),
            records,
            relays,
            self.broker.clone(),
            shutdown_rx,
        )
        .spawn();

        let state = AppState {
            shard_id,
            shard_ref: actor.clone(),
            table,
            metrics,
            client: self.client.clone(),
            readiness: Arc::new(AtomicBool::new(false)),
        };
        let http = listener.map(|(listener, addr)| serve_http(shard_id, listener, addr, state.clone()));

        self.shards.insert(
            shard_id,
            ShardHandle {
                actor,
                consumer,
                shutdown,
                state,
                http,
            },
        );
        Ok(())
    }

    /// Listener for the API of `shard_id`, `None` when HTTP is disabled.
    async fn bind_http(&self, shard_id: ShardId) -> Result<Option<(TcpListener, SocketAddr)>> {
        let HttpMode::Listen(base) = self.http_mode else {
            return Ok(None);
        };
        let mut addr = base;
        if base.port() != 0 {
            let offset = u16::try_from(shard_id).context("shard id does not fit a port offset")?;
            addr.set_port(base.port().checked_add(offset).context("port out of range")?);
        }

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr()?;
        Ok(Some((listener, local_addr)))
    }

    /// Start another shard and rebalance.
    pub async fn add_shard(&mut self, shard_id: ShardId) -> Result<()> {
        self.spawn_shard(shard_id).await?;
        self.refresh_topology().await
    }

    /// Stop a shard gracefully and rebalance its partitions onto the others.
    /// Groups it owns stay assigned to it in the stores.
    pub async fn stop_shard(&mut self, shard_id: ShardId) -> Result<()> {
        let handle = self
            .shards
            .remove(&shard_id)
            .ok_or_else(|| anyhow!("shard {shard_id} is not running"))?;
        self.teardown(shard_id, handle).await;
        self.refresh_topology().await
    }

    async fn teardown(&self, shard_id: ShardId, handle: ShardHandle) {
        handle.state.readiness.store(false, Ordering::Release);
        self.directory.deregister(shard_id);
        self.broker.unsubscribe(shard_id);

        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.consumer.await {
            warn!(shard_id, error = %e, "Consumer task failed");
        }
        if let Err(e) = handle.actor.stop_gracefully().await {
            warn!(shard_id, error = %e, "Failed to stop ShardActor");
        }
        if let Some((_, task)) = handle.http {
            task.abort();
        }

        if let Err(e) = self.durable.deregister_shard(shard_id).await {
            warn!(shard_id, error = %e, "Failed to deregister shard");
        }
        events::shard_deregistered(shard_id);
    }

    /// Hand partitions to the running shards and tell every shard the live set.
    pub async fn refresh_topology(&self) -> Result<()> {
        let local: Vec<ShardId> = self.shards.keys().copied().collect();
        self.broker.rebalance(local);

        let active = self
            .durable
            .active_shards()
            .await
            .context("failed to list active shards")?;

        let notifications = self.shards.iter().map(|(shard_id, handle)| {
            let shards = active.clone();
            async move {
                handle
                    .actor
                    .ask(TopologyChanged { shards })
                    .send()
                    .await
                    .map_err(|e| anyhow!("shard {shard_id} rejected topology change: {e}"))?;
                handle.state.readiness.store(true, Ordering::Release);
                Ok::<_, anyhow::Error>(())
            }
        });
        try_join_all(notifications).await?;
        Ok(())
    }

    /// Stop every shard.
    pub async fn shutdown(mut self) {
        let shards = std::mem::take(&mut self.shards);
        for (shard_id, handle) in shards {
            self.teardown(shard_id, handle).await;
        }
        info!("Local cluster stopped");
    }

    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    pub fn client(&self) -> &Arc<CommandClient> {
        &self.client
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.shards.keys().copied().collect()
    }

    pub fn partitions_for_shard(&self, shard_id: ShardId) -> Vec<Partition> {
        self.client.partitions_for_shard(shard_id)
    }

    pub fn metrics(&self, shard_id: ShardId) -> Option<&ShardMetrics> {
        self.shards.get(&shard_id).map(|h| &h.state.metrics)
    }

    pub fn shard_ref(&self, shard_id: ShardId) -> Option<&ActorRef<ShardActor>> {
        self.shards.get(&shard_id).map(|h| &h.actor)
    }

    /// Address the API of `shard_id` listens on.
    pub fn http_addr(&self, shard_id: ShardId) -> Option<SocketAddr> {
        self.shards
            .get(&shard_id)
            .and_then(|h| h.http.as_ref())
            .map(|(addr, _)| *addr)
    }
}

fn serve_http(
    shard_id: ShardId,
    listener: TcpListener,
    addr: SocketAddr,
    state: AppState,
) -> (SocketAddr, JoinHandle<()>) {
    let app = api::create_router(state);
    info!(shard_id, addr = %addr, "Starting API server");
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(shard_id, error = %e, "API server stopped");
        }
    });
    (addr, task)
}
