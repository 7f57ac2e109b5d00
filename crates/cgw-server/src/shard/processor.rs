//! Command Processor
//!
//! Applies group lifecycle and device assignment commands for the groups a
//! shard owns. Every mutation goes to the durable store first and to the
//! cache second; gauges are updated before the response is returned.
//!
//! Business failures (not found, capacity, already assigned) become
//! `success=false` responses. Store failures are returned as `Err` and the
//! caller drops the command without answering.

use crate::config::CapacityLimits;
use crate::models::{GroupRecord, InfraRecord, Insert, ShardRecord};
use crate::observability::{events, ShardMetrics};
use crate::sharding::OwnershipTable;
use crate::store::StoreResult;
use cgw_core::{CommandEnvelope, CommandKind, InfraMac, ResponseEnvelope, ShardId};
use tracing::debug;

pub struct CommandProcessor {
    table: OwnershipTable,
    limits: CapacityLimits,
    metrics: ShardMetrics,
    assigned_groups: u32,
}

impl CommandProcessor {
    pub fn new(table: OwnershipTable, limits: CapacityLimits, metrics: ShardMetrics) -> Self {
        Self {
            table,
            limits,
            metrics,
            assigned_groups: 0,
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.table.shard_id()
    }

    pub fn table(&self) -> &OwnershipTable {
        &self.table
    }

    pub fn limits(&self) -> &CapacityLimits {
        &self.limits
    }

    pub fn assigned_groups(&self) -> u32 {
        self.assigned_groups
    }

    /// Rebuild the cache projection and counters of this shard from the
    /// durable store. Returns the number of owned groups.
    pub async fn restore(&mut self) -> StoreResult<usize> {
        let shard_id = self.shard_id();
        let groups = self.table.owned_groups().await?;

        for mut group in groups.iter().cloned() {
            let infras = self.table.durable().list_infras(group.gid).await?;
            for infra in &infras {
                self.table.cache().put_infra(infra).await?;
            }

            let count = infras.len() as u32;
            if group.infras_assigned != count {
                debug!(
                    shard_id,
                    group_id = group.gid,
                    recorded = group.infras_assigned,
                    actual = count,
                    "Correcting group infra count"
                );
                group.infras_assigned = count;
                self.table.update(&group).await?;
            } else {
                self.table.cache().put_group(&group).await?;
            }
            self.metrics.set_group_infras(group.gid, count);
        }

        self.assigned_groups = groups.len() as u32;
        self.sync_shard_record().await?;
        Ok(groups.len())
    }

    /// Apply `cmd`, which this shard is responsible for answering.
    pub async fn process(&mut self, cmd: &CommandEnvelope) -> StoreResult<ResponseEnvelope> {
        match cmd.kind {
            CommandKind::GroupCreate | CommandKind::GroupCreateToShard => self.create_group(cmd).await,
            CommandKind::GroupDelete => self.delete_group(cmd).await,
            CommandKind::InfrasAdd => self.add_infras(cmd).await,
            CommandKind::InfrasRemove | CommandKind::InfrasDel => self.remove_infras(cmd).await,
        }
    }

    fn reject(&self, cmd: &CommandEnvelope, reason: String) -> ResponseEnvelope {
        events::command_rejected(self.shard_id(), cmd.kind, cmd.infra_group_id, &cmd.uuid, &reason);
        ResponseEnvelope::failure(cmd, self.shard_id(), reason)
    }

    async fn create_group(&mut self, cmd: &CommandEnvelope) -> StoreResult<ResponseEnvelope> {
        let shard_id = self.shard_id();
        let gid = cmd.infra_group_id;

        if let Some(existing) = self.table.lookup(gid).await? {
            return Ok(self.reject(
                cmd,
                format!("group {gid} already exists on shard {}", existing.shard_id),
            ));
        }
        if self.assigned_groups >= self.limits.groups_capacity {
            return Ok(self.reject(
                cmd,
                format!(
                    "shard {shard_id} reached its groups capacity ({})",
                    self.limits.groups_capacity
                ),
            ));
        }

        // A concurrent create from another shard can still win the insert.
        let group = GroupRecord::new(gid, shard_id, cmd.uuid);
        if let Insert::Exists(existing) = self.table.register_owner(&group).await? {
            return Ok(self.reject(
                cmd,
                format!("group {gid} already exists on shard {}", existing.shard_id),
            ));
        }

        let previous = self.assigned_groups;
        self.assigned_groups += 1;
        self.sync_shard_record().await?;
        self.metrics.set_groups_assigned(self.assigned_groups);
        self.metrics.set_group_infras(gid, 0);

        events::group_created(shard_id, gid, &cmd.uuid, self.assigned_groups);
        let threshold = self.limits.groups_threshold;
        if previous < threshold && self.assigned_groups >= threshold {
            events::groups_threshold_crossed(
                shard_id,
                self.assigned_groups,
                threshold,
                self.limits.groups_capacity,
            );
        }

        Ok(ResponseEnvelope::ok(cmd, shard_id))
    }

    async fn delete_group(&mut self, cmd: &CommandEnvelope) -> StoreResult<ResponseEnvelope> {
        let shard_id = self.shard_id();
        let gid = cmd.infra_group_id;

        let Some(group) = self.table.lookup(gid).await? else {
            return Ok(self.reject(cmd, format!("group {gid} not found")));
        };
        if group.shard_id != shard_id {
            return Ok(self.reject(
                cmd,
                format!("group {gid} is owned by shard {}, not shard {shard_id}", group.shard_id),
            ));
        }

        let infras = self.table.durable().list_infras(gid).await?;
        for infra in &infras {
            self.table.durable().delete_infra(&infra.mac).await?;
            self.table.cache().remove_infra(infra.shard_id, &infra.mac).await?;
        }
        self.table.release(gid).await?;

        self.assigned_groups = self.assigned_groups.saturating_sub(1);
        self.sync_shard_record().await?;
        self.metrics.set_groups_assigned(self.assigned_groups);
        self.metrics.remove_group(gid);

        events::group_deleted(shard_id, gid, &cmd.uuid, infras.len());
        Ok(ResponseEnvelope::ok(cmd, shard_id))
    }

    /// Owned group addressed by an infra command, or the rejection to send.
    async fn owned_group(&self, cmd: &CommandEnvelope) -> StoreResult<Result<GroupRecord, ResponseEnvelope>> {
        let gid = cmd.infra_group_id;
        Ok(match self.table.lookup(gid).await? {
            None => Err(self.reject(cmd, format!("group {gid} not found"))),
            Some(group) if group.shard_id != self.shard_id() => Err(self.reject(
                cmd,
                format!(
                    "group {gid} is owned by shard {}, not shard {}",
                    group.shard_id,
                    self.shard_id()
                ),
            )),
            Some(group) => Ok(group),
        })
    }

    async fn add_infras(&mut self, cmd: &CommandEnvelope) -> StoreResult<ResponseEnvelope> {
        let shard_id = self.shard_id();
        let mut group = match self.owned_group(cmd).await? {
            Ok(group) => group,
            Err(rejection) => return Ok(rejection),
        };

        let mut failed = Vec::new();
        let mut added = 0;
        for raw in &cmd.infra_group_infras {
            let Ok(mac) = raw.parse::<InfraMac>() else {
                debug!(shard_id, group_id = group.gid, infra = %raw, "Unparsable infra address");
                failed.push(raw.clone());
                continue;
            };
            if group.infras_assigned >= self.limits.group_infras_capacity {
                debug!(shard_id, group_id = group.gid, infra = %mac, "Group infra capacity reached");
                failed.push(raw.clone());
                continue;
            }

            let infra = InfraRecord {
                mac,
                group_id: group.gid,
                shard_id,
            };
            match self.table.durable().insert_infra(&infra).await? {
                Insert::Exists(existing) => {
                    debug!(
                        shard_id,
                        group_id = group.gid,
                        infra = %mac,
                        assigned_to = existing.group_id,
                        "Infra already assigned"
                    );
                    failed.push(raw.clone());
                }
                Insert::Created => {
                    self.table.cache().put_infra(&infra).await?;
                    group.infras_assigned += 1;
                    self.table.update(&group).await?;
                    added += 1;
                }
            }
        }

        self.metrics.set_group_infras(group.gid, group.infras_assigned);
        events::infras_assigned(shard_id, group.gid, &cmd.uuid, added, failed.len());
        Ok(ResponseEnvelope::infras(cmd, shard_id, failed))
    }

    async fn remove_infras(&mut self, cmd: &CommandEnvelope) -> StoreResult<ResponseEnvelope> {
        let shard_id = self.shard_id();
        let mut group = match self.owned_group(cmd).await? {
            Ok(group) => group,
            Err(rejection) => return Ok(rejection),
        };

        let mut failed = Vec::new();
        let mut removed = 0;
        for raw in &cmd.infra_group_infras {
            let Ok(mac) = raw.parse::<InfraMac>() else {
                failed.push(raw.clone());
                continue;
            };
            match self.table.durable().get_infra(&mac).await? {
                Some(infra) if infra.group_id == group.gid => {
                    self.table.durable().delete_infra(&mac).await?;
                    self.table.cache().remove_infra(infra.shard_id, &mac).await?;
                    group.infras_assigned = group.infras_assigned.saturating_sub(1);
                    self.table.update(&group).await?;
                    removed += 1;
                }
                _ => {
                    debug!(shard_id, group_id = group.gid, infra = %mac, "Infra not in group");
                    failed.push(raw.clone());
                }
            }
        }

        self.metrics.set_group_infras(group.gid, group.infras_assigned);
        events::infras_released(shard_id, group.gid, &cmd.uuid, removed, failed.len());
        Ok(ResponseEnvelope::infras(cmd, shard_id, failed))
    }

    async fn sync_shard_record(&self) -> StoreResult<()> {
        self.table
            .store_shard_record(&ShardRecord {
                id: self.shard_id(),
                assigned_groups_num: self.assigned_groups,
                groups_capacity: self.limits.groups_capacity,
                groups_threshold: self.limits.groups_threshold,
                group_infras_capacity: self.limits.group_infras_capacity,
            })
            .await
    }
}
