//! CGW Server - sharded infrastructure group control plane

use anyhow::{anyhow, Result};
use cgw_core::ShardId;
use cgw_server::config::split_endpoints;
use cgw_server::observability::{init_tracing, shutdown_tracing, TracingConfig};
use cgw_server::store::{DurableStore, EtcdStore, MemoryDurableStore};
use cgw_server::{version, HttpMode, LocalCluster, ShardConfig};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "cgw-server", version, about = "CGW shard core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one or more shards in this process
    Run(RunArgs),
    /// Print build information
    Version,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Shard ids to run, comma separated; defaults to CGW_ID
    #[arg(long, value_delimiter = ',')]
    shards: Vec<ShardId>,

    /// Number of command topic partitions
    #[arg(long, env = "CGW_PARTITIONS_NUM")]
    partitions: Option<usize>,

    /// Base API address; shard n listens on port + n
    #[arg(long, env = "CGW_METRICS_ADDR")]
    http: Option<SocketAddr>,

    /// Disable the HTTP API
    #[arg(long)]
    no_http: bool,

    /// Etcd endpoints; the in-memory store is used when empty
    #[arg(long, env = "ETCD_ENDPOINTS")]
    etcd_endpoints: Option<String>,

    /// Seconds a client waits for a command response
    #[arg(long)]
    command_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("{}", version::BUILD);
            Ok(())
        }
        Command::Run(args) => {
            init_tracing(TracingConfig::from_env()).map_err(|e| anyhow!("failed to init tracing: {e}"))?;
            let result = run(args).await;
            shutdown_tracing();
            result
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = ShardConfig::from_env();
    if let Some(partitions) = args.partitions {
        config.partitions_num = partitions.max(1);
    }
    if let Some(endpoints) = args.etcd_endpoints.as_deref() {
        config.etcd_endpoints = split_endpoints(endpoints);
    }
    if let Some(secs) = args.command_timeout {
        config.command_timeout = Duration::from_secs(secs);
    }

    let shard_ids = if args.shards.is_empty() {
        vec![config.shard_id]
    } else {
        args.shards
    };

    let http_mode = if args.no_http {
        HttpMode::Disabled
    } else {
        let addr = match args.http {
            Some(addr) => addr,
            None => config.metrics_addr.parse()?,
        };
        HttpMode::Listen(addr)
    };

    info!(version = %version::BUILD.short(), shards = ?shard_ids, "Starting CGW server");

    let durable: Arc<dyn DurableStore> = if config.etcd_endpoints.is_empty() {
        info!("No etcd endpoints configured, using in-memory durable store");
        Arc::new(MemoryDurableStore::new())
    } else {
        info!(endpoints = ?config.etcd_endpoints, "Connecting to etcd");
        Arc::new(EtcdStore::connect(&config).await?)
    };

    let cluster = LocalCluster::start(config, durable, &shard_ids, http_mode).await?;
    for shard_id in cluster.shard_ids() {
        info!(
            shard_id,
            partitions = ?cluster.partitions_for_shard(shard_id),
            addr = ?cluster.http_addr(shard_id),
            "Shard running"
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    cluster.shutdown().await;
    Ok(())
}
