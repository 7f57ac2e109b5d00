//! CGW Server Library
//!
//! Shard core of the cloud gateway control plane: partition routing, group
//! ownership, relaying between shards and dual-store group state.

pub mod api;
pub mod broker;
pub mod client;
pub mod cluster;
pub mod config;
pub mod models;
pub mod observability;
pub mod shard;
pub mod sharding;
pub mod store;
pub mod version;

pub use cluster::{HttpMode, LocalCluster};
pub use config::ShardConfig;
