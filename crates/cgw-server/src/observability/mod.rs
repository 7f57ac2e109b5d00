//! Observability Module
//!
//! - `metrics`: per-shard Prometheus gauges
//! - `events`: structured event logging with consistent fields
//! - `tracing`: subscriber and OpenTelemetry setup

pub mod events;
pub mod metrics;
pub mod tracing;

pub use self::metrics::ShardMetrics;
pub use self::tracing::{init_tracing, shutdown_tracing, LogFormat, TracingConfig};
