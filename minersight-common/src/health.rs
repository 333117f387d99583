//! Health and liveness types shared between collectors and their consumers.

use serde::{Deserialize, Serialize};

/// Device availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Device is responding normally.
    Online,
    /// Device is not responding.
    Offline,
    /// Device failed recently but not often enough to be declared offline.
    Degraded,
    /// Device status is unknown (never polled).
    #[default]
    Unknown,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline => write!(f, "offline"),
            DeviceStatus::Degraded => write!(f, "degraded"),
            DeviceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Health snapshot of a collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Collector name.
    pub collector: String,
    /// Overall health status.
    pub status: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Devices seen so far.
    pub devices_total: u64,
    /// Devices currently responding.
    pub devices_responding: u64,
    /// Devices currently failed.
    pub devices_failed: u64,
    /// Last cycle duration in milliseconds.
    pub last_cycle_duration_ms: u64,
    /// Per-device errors since start.
    pub errors_total: u64,
    /// Total samples handed to the sink.
    pub samples_published: u64,
}

/// Device liveness information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLiveness {
    /// Device identifier.
    pub device: String,
    /// Current status.
    pub status: DeviceStatus,
    /// Last seen timestamp (millis since epoch).
    pub last_seen: i64,
    /// Consecutive failures count.
    pub consecutive_failures: u32,
    /// Last error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Error type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Connect or read timeout.
    Timeout,
    /// Connection refused or host unreachable.
    ConnectionRefused,
    /// Connection reset or closed mid-exchange.
    ConnectionReset,
    /// Response was not valid or complete JSON.
    ParseError,
    /// Device answered with an error status.
    ProtocolError,
    /// Device is no longer in the registry.
    NotRegistered,
    /// Other/unknown error.
    #[default]
    Other,
}

impl ErrorType {
    /// Whether retrying on the next cycle can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorType::NotRegistered)
    }
}
