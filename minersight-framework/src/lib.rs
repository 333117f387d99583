//! MinerSight Collector Framework
//!
//! Common abstractions for building collectors that talk to mining devices.
//!
//! # Overview
//!
//! This framework provides:
//! - [`CollectorConfig`] trait for configuration loading and validation
//! - [`CollectorRunner`] for managing collector lifecycle (startup, shutdown, signal handling)
//! - [`CollectorHealth`] for per-device liveness and collector health metrics
//! - [`CollectorArgs`] for common CLI argument parsing
//! - [`shutdown`] helpers for workers observing the shutdown signal
//!
//! # Example
//!
//! ```ignore
//! use minersight_framework::{CollectorConfig, CollectorRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MyCollectorConfig::load("collector.json5")?;
//!     let mut runner = CollectorRunner::init("mycollector", config, None)?;
//!
//!     let shutdown = runner.shutdown_signal();
//!     runner.spawn(my_worker(shutdown));
//!
//!     // Run until Ctrl+C
//!     Ok(runner.run().await?)
//! }
//! ```

mod args;
mod config;
mod error;
mod health;
mod runner;
pub mod shutdown;

pub use args::CollectorArgs;
pub use config::CollectorConfig;
pub use error::{FrameworkError, Result};
pub use health::{CollectorHealth, OFFLINE_AFTER_FAILURES};
pub use runner::{CollectorRunner, DEFAULT_GRACE_PERIOD};

// Re-export commonly used types from minersight-common
pub use minersight_common::{Format, LoggingConfig, OutputConfig};
