//! Prometheus Metrics
//!
//! Every shard owns its own recorder so that several shards can run in one
//! process (local cluster, tests) without sharing gauges. Nothing is installed
//! globally; updates go through [`metrics::with_local_recorder`].
//!
//! Gauges:
//! - `cgw_active_shards_num` - live shards in the cluster
//! - `cgw_connections_num` - device sessions (always 0, no device transport here)
//! - `cgw_groups_assigned_num` - groups owned by this shard
//! - `cgw_group_<id>_infras_assigned_num` - infras assigned to one group
//! - `cgw_groups_capacity` - configured group capacity
//! - `cgw_groups_threshold` - configured warning threshold
//! - `cgw_group_ifras_capacity` - configured per-group infra capacity
//!
//! The recorder cannot forget a series, so deleted groups are kept in a
//! retired set and left out of the rendered exposition.

use crate::config::CapacityLimits;
use cgw_core::GroupId;
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

pub const ACTIVE_SHARDS: &str = "cgw_active_shards_num";
pub const CONNECTIONS: &str = "cgw_connections_num";
pub const GROUPS_ASSIGNED: &str = "cgw_groups_assigned_num";
pub const GROUPS_CAPACITY: &str = "cgw_groups_capacity";
pub const GROUPS_THRESHOLD: &str = "cgw_groups_threshold";
pub const GROUP_INFRAS_CAPACITY: &str = "cgw_group_ifras_capacity";

/// Name of the per-group infra gauge.
pub fn group_infras_gauge(group_id: GroupId) -> String {
    format!("cgw_group_{group_id}_infras_assigned_num")
}

/// Per-shard metrics registry and renderer.
#[derive(Clone)]
pub struct ShardMetrics {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    retired: Arc<Mutex<HashSet<String>>>,
}

impl ShardMetrics {
    pub fn new(limits: &CapacityLimits) -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let metrics = Self {
            recorder: Arc::new(recorder),
            handle,
            retired: Arc::new(Mutex::new(HashSet::new())),
        };

        metrics.scoped(|| {
            register_metric_descriptions();
            gauge!(CONNECTIONS).set(0.0);
            gauge!(ACTIVE_SHARDS).set(0.0);
            gauge!(GROUPS_ASSIGNED).set(0.0);
            gauge!(GROUPS_CAPACITY).set(f64::from(limits.groups_capacity));
            gauge!(GROUPS_THRESHOLD).set(f64::from(limits.groups_threshold));
            gauge!(GROUP_INFRAS_CAPACITY).set(f64::from(limits.group_infras_capacity));
        });
        metrics
    }

    fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(self.recorder.as_ref(), f)
    }

    pub fn set_active_shards(&self, count: usize) {
        self.scoped(|| gauge!(ACTIVE_SHARDS).set(count as f64));
    }

    pub fn set_groups_assigned(&self, count: u32) {
        self.scoped(|| gauge!(GROUPS_ASSIGNED).set(f64::from(count)));
    }

    pub fn set_group_infras(&self, group_id: GroupId, count: u32) {
        let name = group_infras_gauge(group_id);
        self.retired.lock().remove(&name);
        self.scoped(|| gauge!(name).set(f64::from(count)));
    }

    /// Drop the infra gauge of a deleted group from the exposition.
    pub fn remove_group(&self, group_id: GroupId) {
        let name = group_infras_gauge(group_id);
        self.scoped(|| gauge!(name.clone()).set(0.0));
        self.retired.lock().insert(name);
    }

    /// Prometheus text exposition of this shard's gauges.
    pub fn render(&self) -> String {
        let rendered = self.handle.render();
        let retired = self.retired.lock();
        if retired.is_empty() {
            return rendered;
        }

        let mut out = String::with_capacity(rendered.len());
        let mut skipping = false;
        for line in rendered.lines() {
            if line.is_empty() {
                if !skipping {
                    out.push('\n');
                }
                skipping = false;
                continue;
            }
            if series_name(line).is_some_and(|name| retired.contains(name)) {
                skipping = true;
                continue;
            }
            skipping = false;
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Metric name a exposition line belongs to.
fn series_name(line: &str) -> Option<&str> {
    if let Some(meta) = line.strip_prefix("# ") {
        return meta.split_whitespace().nth(1);
    }
    line.split(|c: char| c == ' ' || c == '{').next()
}

fn register_metric_descriptions() {
    describe_gauge!(ACTIVE_SHARDS, "Number of live shards in the cluster");
    describe_gauge!(CONNECTIONS, "Number of connected devices");
    describe_gauge!(GROUPS_ASSIGNED, "Number of groups owned by this shard");
    describe_gauge!(GROUPS_CAPACITY, "Maximum number of groups this shard may own");
    describe_gauge!(GROUPS_THRESHOLD, "Owned-groups level that triggers a load warning");
    describe_gauge!(GROUP_INFRAS_CAPACITY, "Maximum number of infras per group");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(rendered: &str, name: &str) -> Option<f64> {
        rendered
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| {
                let (metric, value) = line.split_once(' ')?;
                (metric == name).then(|| value.trim().parse().ok())?
            })
    }

    #[test]
    fn test_capacity_gauges_exported() {
        let metrics = ShardMetrics::new(&CapacityLimits::default());
        let rendered = metrics.render();
        assert_eq!(value_of(&rendered, GROUPS_CAPACITY), Some(1000.0));
        assert_eq!(value_of(&rendered, GROUPS_THRESHOLD), Some(50.0));
        assert_eq!(value_of(&rendered, GROUP_INFRAS_CAPACITY), Some(2000.0));
        assert_eq!(value_of(&rendered, CONNECTIONS), Some(0.0));
    }

    #[test]
    fn test_group_gauge() {
        let metrics = ShardMetrics::new(&CapacityLimits::default());
        metrics.set_group_infras(100, 2);
        assert_eq!(
            value_of(&metrics.render(), "cgw_group_100_infras_assigned_num"),
            Some(2.0)
        );
    }

    #[test]
    fn test_removed_group_leaves_exposition() {
        let metrics = ShardMetrics::new(&CapacityLimits::default());
        metrics.set_group_infras(100, 2);
        metrics.set_group_infras(200, 1);
        metrics.remove_group(100);

        let rendered = metrics.render();
        assert!(!rendered.contains("cgw_group_100_infras_assigned_num"));
        assert_eq!(value_of(&rendered, "cgw_group_200_infras_assigned_num"), Some(1.0));
        assert_eq!(value_of(&rendered, GROUPS_CAPACITY), Some(1000.0));

        metrics.set_group_infras(100, 0);
        assert_eq!(
            value_of(&metrics.render(), "cgw_group_100_infras_assigned_num"),
            Some(0.0)
        );
    }

    #[test]
    fn test_shards_do_not_share_gauges() {
        let a = ShardMetrics::new(&CapacityLimits::default());
        let b = ShardMetrics::new(&CapacityLimits::default());
        a.set_groups_assigned(3);
        assert_eq!(value_of(&a.render(), GROUPS_ASSIGNED), Some(3.0));
        assert_eq!(value_of(&b.render(), GROUPS_ASSIGNED), Some(0.0));
    }
}
