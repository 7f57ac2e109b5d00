//! Structured Events
//!
//! One function per domain event so field names stay consistent across the
//! code base. Every event carries `event_type` and the reporting `shard_id`.
//!
//! Event types:
//! - `shard_registered` / `shard_deregistered` - Shard lifecycle in the durable store
//! - `topology_changed` - Live shard set changed
//! - `group_created` / `group_deleted` - Group lifecycle
//! - `groups_threshold_crossed` - Shard load warning
//! - `infras_assigned` / `infras_released` - Device batch applied
//! - `command_relayed` - Command forwarded to the owning shard
//! - `command_rejected` - Command answered with `success=false`
//! - `command_aborted` - Command dropped without a response

use cgw_core::{CommandKind, GroupId, ShardId};
use tracing::{error, info, warn};
use uuid::Uuid;

pub fn shard_registered(shard_id: ShardId, restored_groups: usize) {
    info!(
        event_type = "shard_registered",
        shard_id = shard_id,
        restored_groups = restored_groups,
        "Shard registered"
    );
}

pub fn shard_deregistered(shard_id: ShardId) {
    info!(
        event_type = "shard_deregistered",
        shard_id = shard_id,
        "Shard deregistered"
    );
}

pub fn topology_changed(shard_id: ShardId, previous_count: usize, new_count: usize) {
    info!(
        event_type = "topology_changed",
        shard_id = shard_id,
        previous_count = previous_count,
        new_count = new_count,
        "Topology changed"
    );
}

pub fn group_created(shard_id: ShardId, group_id: GroupId, uuid: &Uuid, assigned_groups: u32) {
    info!(
        event_type = "group_created",
        shard_id = shard_id,
        group_id = group_id,
        uuid = %uuid,
        assigned_groups = assigned_groups,
        "Group created"
    );
}

pub fn group_deleted(shard_id: ShardId, group_id: GroupId, uuid: &Uuid, released_infras: usize) {
    info!(
        event_type = "group_deleted",
        shard_id = shard_id,
        group_id = group_id,
        uuid = %uuid,
        released_infras = released_infras,
        "Group deleted"
    );
}

pub fn groups_threshold_crossed(shard_id: ShardId, assigned_groups: u32, threshold: u32, capacity: u32) {
    warn!(
        event_type = "groups_threshold_crossed",
        shard_id = shard_id,
        assigned_groups = assigned_groups,
        threshold = threshold,
        capacity = capacity,
        "Assigned groups reached threshold"
    );
}

pub fn infras_assigned(shard_id: ShardId, group_id: GroupId, uuid: &Uuid, added: usize, failed: usize) {
    info!(
        event_type = "infras_assigned",
        shard_id = shard_id,
        group_id = group_id,
        uuid = %uuid,
        added = added,
        failed = failed,
        "Infras assigned"
    );
}

pub fn infras_released(shard_id: ShardId, group_id: GroupId, uuid: &Uuid, removed: usize, failed: usize) {
    info!(
        event_type = "infras_released",
        shard_id = shard_id,
        group_id = group_id,
        uuid = %uuid,
        removed = removed,
        failed = failed,
        "Infras released"
    );
}

pub fn command_relayed(shard_id: ShardId, target_shard_id: ShardId, kind: CommandKind, group_id: GroupId, uuid: &Uuid) {
    info!(
        event_type = "command_relayed",
        shard_id = shard_id,
        target_shard_id = target_shard_id,
        kind = %kind,
        group_id = group_id,
        uuid = %uuid,
        "Command relayed to owner"
    );
}

pub fn command_rejected(shard_id: ShardId, kind: CommandKind, group_id: GroupId, uuid: &Uuid, reason: &str) {
    warn!(
        event_type = "command_rejected",
        shard_id = shard_id,
        kind = %kind,
        group_id = group_id,
        uuid = %uuid,
        reason = %reason,
        "Command rejected"
    );
}

pub fn command_aborted(shard_id: ShardId, kind: CommandKind, group_id: GroupId, uuid: &Uuid, error: &str) {
    error!(
        event_type = "command_aborted",
        shard_id = shard_id,
        kind = %kind,
        group_id = group_id,
        uuid = %uuid,
        error = %error,
        "Command aborted, no response published"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_functions_dont_panic() {
        let uuid = Uuid::new_v4();
        shard_registered(0, 3);
        shard_deregistered(0);
        topology_changed(0, 1, 2);
        group_created(0, 100, &uuid, 1);
        group_deleted(0, 100, &uuid, 2);
        groups_threshold_crossed(0, 50, 50, 1000);
        infras_assigned(0, 100, &uuid, 1, 0);
        infras_released(0, 100, &uuid, 0, 1);
        command_relayed(1, 0, CommandKind::InfrasAdd, 100, &uuid);
        command_rejected(0, CommandKind::GroupDelete, 7, &uuid, "not found");
        command_aborted(0, CommandKind::GroupCreate, 7, &uuid, "store unavailable");
    }
}
