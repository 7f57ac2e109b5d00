//! Shard Module
//!
//! Everything one shard runs:
//!
//! - `ShardActor` routes each inbound command (local, relay, reject) and
//!   applies local ones through the `CommandProcessor`
//! - `ShardConsumer` feeds the actor from the shard's partitions and relay
//!   inbox and publishes its answers
//! - `ShardDirectory` holds the relay inboxes of the shards in this process
//!
//! ## Usage
//!
//! ```ignore
//! let disposition = shard_ref.ask(Inbound::consumed(command, partition)).send().await?;
//! if let Disposition::Answered(response) = disposition {
//!     publisher.publish(response.to_vec()?);
//! }
//! ```

mod actor;
mod consumer;
mod messages;
mod processor;
mod relay;

pub use actor::ShardActor;
pub use consumer::ShardConsumer;
pub use messages::{Disposition, GetShardStats, Inbound, ShardStats, TopologyAck, TopologyChanged};
pub use processor::CommandProcessor;
pub use relay::{route, RelayError, Route, ShardDirectory};
