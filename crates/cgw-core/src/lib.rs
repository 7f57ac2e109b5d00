//! Core shared types for CGW
//!
//! This crate contains the wire envelopes exchanged over the command and
//! response topics, together with the identifiers they carry. Both the shard
//! service and its clients depend on it.

pub mod command;
pub mod infra;
pub mod response;

pub use command::{CommandEnvelope, CommandError, CommandKind};
pub use infra::InfraMac;
pub use response::ResponseEnvelope;

/// Infrastructure group identifier, globally unique across the cluster.
pub type GroupId = i32;

/// Logical shard identifier. One gateway instance owns exactly one.
pub type ShardId = i32;

/// Broker partition index within a topic.
pub type Partition = i32;
