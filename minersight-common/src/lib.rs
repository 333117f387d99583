//! MinerSight Common Library
//!
//! This crate provides shared types and utilities for MinerSight collectors:
//!
//! - [`telemetry`] - Data model (`Address`, `DeviceRecord`, `TelemetrySample`, `CycleReport`)
//! - [`health`] - Device liveness and error classification
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod health;
pub mod serialization;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, OutputConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use health::{DeviceLiveness, DeviceStatus, ErrorType, HealthSnapshot};
pub use serialization::{Format, decode, encode};
pub use telemetry::{
    Address, CycleReport, DEFAULT_API_PORT, DeviceFailure, DeviceRecord, RawResponses,
    TelemetrySample, current_timestamp_millis,
};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
