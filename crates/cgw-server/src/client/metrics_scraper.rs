//! Metrics scraper
//!
//! Reads a shard's `/metrics` endpoint. A metric missing from the exposition
//! reads as zero, which is what a gauge that was never set means.

use crate::observability::metrics::{
    group_infras_gauge, ACTIVE_SHARDS, GROUPS_ASSIGNED, GROUPS_CAPACITY, GROUP_INFRAS_CAPACITY,
};
use cgw_core::GroupId;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct MetricsScraper {
    http: reqwest::Client,
}

impl MetricsScraper {
    pub fn new() -> Result<Self, ScrapeError> {
        let http = reqwest::Client::builder().timeout(SCRAPE_TIMEOUT).build()?;
        Ok(Self { http })
    }

    /// Scrape `{base_url}/metrics`, e.g. `http://127.0.0.1:8080`.
    pub async fn scrape(&self, base_url: &str) -> Result<MetricsSnapshot, ScrapeError> {
        let url = format!("{}/metrics", base_url.trim_end_matches('/'));
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(MetricsSnapshot::parse(&body))
    }
}

/// Unlabelled samples of one exposition.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    samples: HashMap<String, f64>,
}

impl MetricsSnapshot {
    pub fn parse(text: &str) -> Self {
        let samples = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let name = parts.next()?;
                let value = parts.next()?.parse().ok()?;
                Some((name.to_string(), value))
            })
            .collect();
        Self { samples }
    }

    pub fn raw(&self, name: &str) -> Option<f64> {
        self.samples.get(name).copied()
    }

    /// Value of `name`, zero when absent.
    pub fn value(&self, name: &str) -> u64 {
        self.raw(name).map_or(0, |v| v.max(0.0) as u64)
    }

    pub fn active_shards(&self) -> u64 {
        self.value(ACTIVE_SHARDS)
    }

    pub fn groups_assigned(&self) -> u64 {
        self.value(GROUPS_ASSIGNED)
    }

    pub fn groups_capacity(&self) -> u64 {
        self.value(GROUPS_CAPACITY)
    }

    pub fn group_infras_capacity(&self) -> u64 {
        self.value(GROUP_INFRAS_CAPACITY)
    }

    pub fn group_infras(&self, group_id: GroupId) -> u64 {
        self.value(&group_infras_gauge(group_id))
    }
}
