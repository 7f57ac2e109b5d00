//! Client Side
//!
//! What an operator tool or a test harness uses to drive a cluster:
//! - `CommandClient`: produce a command, wait for its uuid-matched response
//! - `MetricsScraper`: read a shard's gauges over HTTP

mod command_client;
mod metrics_scraper;

pub use command_client::{ClientError, CommandClient, SendTarget};
pub use metrics_scraper::{MetricsScraper, MetricsSnapshot, ScrapeError, SCRAPE_TIMEOUT};
