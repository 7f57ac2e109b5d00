//! Integration tests for a multi-shard cluster running in one process.

use cgw_core::{CommandEnvelope, CommandKind, ResponseEnvelope, ShardId};
use cgw_server::client::{ClientError, MetricsSnapshot, SendTarget};
use cgw_server::shard::{GetShardStats, ShardStats};
use cgw_server::store::{CacheStore, DurableStore, MemoryDurableStore};
use cgw_server::{HttpMode, LocalCluster, ShardConfig};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const MAC_A: &str = "11-22-33-44-55-66";
const MAC_B: &str = "11-22-33-44-55-67";

// ==================== Helper Functions ====================

fn test_config() -> ShardConfig {
    ShardConfig {
        partitions_num: 2,
        command_timeout: Duration::from_secs(5),
        ..ShardConfig::default()
    }
}

async fn start(shards: &[ShardId]) -> (LocalCluster, Arc<MemoryDurableStore>) {
    let durable = Arc::new(MemoryDurableStore::new());
    let cluster = LocalCluster::start(test_config(), durable.clone(), shards, HttpMode::Disabled)
        .await
        .expect("failed to start cluster");
    (cluster, durable)
}

async fn send(cluster: &LocalCluster, cmd: CommandEnvelope, target: SendTarget) -> ResponseEnvelope {
    cluster
        .client()
        .send(&cmd, target)
        .await
        .expect("command was not answered")
}

async fn stats(cluster: &LocalCluster, shard_id: ShardId) -> ShardStats {
    cluster
        .shard_ref(shard_id)
        .expect("shard not running")
        .ask(GetShardStats)
        .send()
        .await
        .expect("stats request failed")
}

fn gauges(cluster: &LocalCluster, shard_id: ShardId) -> MetricsSnapshot {
    MetricsSnapshot::parse(&cluster.metrics(shard_id).expect("shard not running").render())
}

/// Group 100 owned by shard 0.
async fn create_group_on_shard_0(cluster: &LocalCluster) {
    let response = send(
        cluster,
        CommandEnvelope::group_create(100, Uuid::new_v4()),
        SendTarget::Shard(0),
    )
    .await;
    assert!(response.success, "{:?}", response.error_message);
    assert_eq!(response.reporter_shard_id, 0);
}

// ==================== Topology Tests ====================

#[tokio::test]
async fn test_partitions_split_between_shards() {
    let (cluster, _) = start(&[0, 1]).await;

    assert_eq!(cluster.partitions_for_shard(0), vec![0]);
    assert_eq!(cluster.partitions_for_shard(1), vec![1]);
    assert_eq!(gauges(&cluster, 0).active_shards(), 2);
    assert_eq!(stats(&cluster, 1).await.active_shards, vec![0, 1]);

    cluster.shutdown().await;
}

// ==================== Group Lifecycle Tests ====================

#[tokio::test]
async fn test_create_is_owned_by_consuming_shard() {
    let (cluster, durable) = start(&[0, 1]).await;

    let response = send(
        &cluster,
        CommandEnvelope::group_create(7, Uuid::new_v4()),
        SendTarget::Shard(1),
    )
    .await;
    assert!(response.success);
    assert_eq!(response.reporter_shard_id, 1);
    assert_eq!(durable.get_group(7).await.unwrap().unwrap().shard_id, 1);
    assert_eq!(gauges(&cluster, 1).groups_assigned(), 1);
    assert_eq!(gauges(&cluster, 0).groups_assigned(), 0);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_create_to_shard_is_relayed_to_target() {
    let (cluster, durable) = start(&[0, 1]).await;

    let cmd = CommandEnvelope::group_create_to_shard(42, 1, Uuid::new_v4());
    let response = send(&cluster, cmd, SendTarget::Shard(0)).await;
    assert!(response.success);
    assert_eq!(response.reporter_shard_id, 1);
    assert_eq!(durable.get_group(42).await.unwrap().unwrap().shard_id, 1);
    assert_eq!(stats(&cluster, 0).await.commands_relayed, 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_delete_unknown_group_changes_nothing() {
    let (cluster, _) = start(&[0, 1]).await;
    create_group_on_shard_0(&cluster).await;

    let response = send(
        &cluster,
        CommandEnvelope::group_delete(999, Uuid::new_v4()),
        SendTarget::Key,
    )
    .await;
    assert!(!response.success);
    assert_eq!(response.error_message.as_deref(), Some("group 999 not found"));
    assert_eq!(stats(&cluster, 0).await.assigned_groups_num, 1);
    assert_eq!(stats(&cluster, 1).await.assigned_groups_num, 0);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_delete_from_other_shard_releases_group() {
    let (cluster, durable) = start(&[0, 1]).await;
    create_group_on_shard_0(&cluster).await;
    send(
        &cluster,
        CommandEnvelope::infras_add(100, [MAC_A], Uuid::new_v4()),
        SendTarget::Shard(0),
    )
    .await;

    let response = send(
        &cluster,
        CommandEnvelope::group_delete(100, Uuid::new_v4()),
        SendTarget::Shard(1),
    )
    .await;
    assert!(response.success);
    assert_eq!(response.reporter_shard_id, 0);
    assert!(durable.get_group(100).await.unwrap().is_none());
    assert!(cluster.cache().get_group(100).await.unwrap().is_none());
    assert!(durable.get_infra(&MAC_A.parse().unwrap()).await.unwrap().is_none());
    assert_eq!(gauges(&cluster, 0).groups_assigned(), 0);
    assert!(gauges(&cluster, 0).raw("cgw_group_100_infras_assigned_num").is_none());

    cluster.shutdown().await;
}

// ==================== Relay Tests ====================

#[tokio::test]
async fn test_infras_add_relayed_to_owner() {
    let (cluster, durable) = start(&[0, 1]).await;
    create_group_on_shard_0(&cluster).await;

    let response = send(
        &cluster,
        CommandEnvelope::infras_add(100, [MAC_A], Uuid::new_v4()),
        SendTarget::Shard(1),
    )
    .await;
    assert!(response.success);
    assert_eq!(response.reporter_shard_id, 0);
    assert!(response.failed().is_empty());

    assert_eq!(gauges(&cluster, 0).group_infras(100), 1);
    assert_eq!(gauges(&cluster, 1).group_infras(100), 0);

    let stored = durable.get_group(100).await.unwrap().unwrap();
    let cached = cluster.cache().get_group(100).await.unwrap().unwrap();
    assert_eq!(stored.infras_assigned, 1);
    assert!(stored.agrees_with(&cached));
    assert_eq!(cluster.cache().infra_count(0), 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_infras_remove_relayed_to_owner() {
    let (cluster, durable) = start(&[0, 1]).await;
    create_group_on_shard_0(&cluster).await;
    send(
        &cluster,
        CommandEnvelope::infras_add(100, [MAC_A, MAC_B], Uuid::new_v4()),
        SendTarget::Shard(0),
    )
    .await;

    let response = send(
        &cluster,
        CommandEnvelope::infras_remove(100, [MAC_A], Uuid::new_v4()),
        SendTarget::Shard(1),
    )
    .await;
    assert!(response.success);
    assert_eq!(response.reporter_shard_id, 0);
    assert_eq!(response.response_type, "infrastructure_group_infras_remove_response");
    assert_eq!(gauges(&cluster, 0).group_infras(100), 1);
    assert_eq!(durable.list_infras(100).await.unwrap().len(), 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_infras_del_answered_with_del_type() {
    let (cluster, durable) = start(&[0, 1]).await;
    create_group_on_shard_0(&cluster).await;
    send(
        &cluster,
        CommandEnvelope::infras_add(100, [MAC_A], Uuid::new_v4()),
        SendTarget::Shard(0),
    )
    .await;

    let mut cmd = CommandEnvelope::infras_remove(100, [MAC_A], Uuid::new_v4());
    cmd.kind = CommandKind::InfrasDel;
    let response = send(&cluster, cmd, SendTarget::Shard(1)).await;
    assert!(response.success);
    assert_eq!(response.reporter_shard_id, 0);
    assert_eq!(response.response_type, "infrastructure_group_infras_del_response");
    assert!(durable.list_infras(100).await.unwrap().is_empty());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_partial_failure_lists_assigned_device() {
    let (cluster, _) = start(&[0, 1]).await;
    create_group_on_shard_0(&cluster).await;
    send(
        &cluster,
        CommandEnvelope::infras_add(100, [MAC_A], Uuid::new_v4()),
        SendTarget::Shard(0),
    )
    .await;
    send(
        &cluster,
        CommandEnvelope::group_create(200, Uuid::new_v4()),
        SendTarget::Shard(1),
    )
    .await;

    let response = send(
        &cluster,
        CommandEnvelope::infras_add(200, [MAC_A, MAC_B], Uuid::new_v4()),
        SendTarget::Shard(0),
    )
    .await;
    assert!(!response.success);
    assert_eq!(response.reporter_shard_id, 1);
    assert_eq!(response.failed(), [MAC_A.to_string()]);
    assert_eq!(gauges(&cluster, 1).group_infras(200), 1);
    assert_eq!(gauges(&cluster, 0).group_infras(100), 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_one_response_per_command() {
    let (cluster, _) = start(&[0, 1]).await;
    create_group_on_shard_0(&cluster).await;

    for (i, target) in [SendTarget::Shard(0), SendTarget::Shard(1), SendTarget::Key]
        .into_iter()
        .enumerate()
    {
        let mac = format!("11-22-33-44-55-0{i}");
        send(&cluster, CommandEnvelope::infras_add(100, [mac], Uuid::new_v4()), target).await;
    }
    send(
        &cluster,
        CommandEnvelope::group_delete(12345, Uuid::new_v4()),
        SendTarget::Shard(1),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cluster.client().stray_responses(), 0);
    assert_eq!(cluster.client().pending_count(), 0);

    cluster.shutdown().await;
}

// ==================== Failure Tests ====================

#[tokio::test]
async fn test_store_failure_leaves_command_unanswered() {
    let (cluster, durable) = start(&[0, 1]).await;
    durable.set_unavailable(true);

    let cmd = CommandEnvelope::group_create(300, Uuid::new_v4());
    let err = cluster
        .client()
        .send_with_timeout(&cmd, SendTarget::Shard(0), Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout { uuid, .. } if uuid == cmd.uuid));
    assert_eq!(stats(&cluster, 0).await.commands_aborted, 1);

    durable.set_unavailable(false);
    assert!(durable.get_group(300).await.unwrap().is_none());
    assert_eq!(stats(&cluster, 0).await.assigned_groups_num, 0);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_relay_to_stopped_owner_is_answered_with_error() {
    let (mut cluster, _) = start(&[0, 1]).await;
    create_group_on_shard_0(&cluster).await;

    cluster.stop_shard(0).await.unwrap();
    assert_eq!(cluster.partitions_for_shard(1), vec![0, 1]);

    let response = send(
        &cluster,
        CommandEnvelope::infras_add(100, [MAC_A], Uuid::new_v4()),
        SendTarget::Key,
    )
    .await;
    assert!(!response.success);
    assert_eq!(response.reporter_shard_id, 1);
    assert_eq!(response.error_message.as_deref(), Some("shard 0 is not available"));
    assert_eq!(response.failed(), [MAC_A.to_string()]);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_restarted_shard_restores_its_groups() {
    let (mut cluster, _) = start(&[0, 1]).await;
    create_group_on_shard_0(&cluster).await;
    send(
        &cluster,
        CommandEnvelope::infras_add(100, [MAC_A, MAC_B], Uuid::new_v4()),
        SendTarget::Shard(0),
    )
    .await;

    cluster.stop_shard(0).await.unwrap();
    cluster.cache().clear();
    cluster.add_shard(0).await.unwrap();

    assert_eq!(stats(&cluster, 0).await.assigned_groups_num, 1);
    assert_eq!(gauges(&cluster, 0).group_infras(100), 2);
    assert_eq!(gauges(&cluster, 0).active_shards(), 2);
    assert_eq!(cluster.cache().infra_count(0), 2);

    let response = send(
        &cluster,
        CommandEnvelope::infras_remove(100, [MAC_B], Uuid::new_v4()),
        SendTarget::Shard(1),
    )
    .await;
    assert!(response.success);
    assert_eq!(response.reporter_shard_id, 0);

    cluster.shutdown().await;
}
