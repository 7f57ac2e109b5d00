//! Sharding
//!
//! Two independent mappings decide where a command is handled:
//!
//! ```text
//! group id ──murmur2──► partition ──range assignment──► consuming shard
//!                                                            │
//!                                     OwnershipTable.resolve_owner(gid)
//!                                                            ▼
//!                                                       owning shard
//! ```
//!
//! The first is advisory: whichever shard consumes the partition asks the
//! ownership table and relays if it is not the owner.

mod assignment;
mod ownership;
mod partitioner;

pub use assignment::PartitionAssignment;
pub use ownership::OwnershipTable;
pub use partitioner::{murmur2, partition_for_key, partition_key};
