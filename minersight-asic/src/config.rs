//! Configuration for the ASIC collector.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use minersight_common::{Address, DEFAULT_API_PORT, LoggingConfig, OutputConfig};
use minersight_framework::{CollectorConfig, FrameworkError};

use crate::client::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_RESPONSE_BYTES, ProtocolClient,
};
use crate::poller::PollOptions;
use crate::scanner::{DEFAULT_CONCURRENCY, DEFAULT_MAX_HOSTS, NetworkScanner, ScanError};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("network.port must not be 0")]
    InvalidPort,
    #[error("{0} must be greater than 0")]
    ZeroValue(&'static str),
    #[error("scan.cidr: {0}")]
    Scan(#[from] ScanError),
    #[error("device '{host}': {reason}")]
    Device { host: String, reason: String },
}

/// Complete collector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsicCollectorConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Wire protocol settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Discovery settings
    #[serde(default)]
    pub scan: ScanConfig,

    /// Polling loop settings
    #[serde(default)]
    pub polling: PollingConfig,

    /// Statically configured devices, always polled
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Where records are written
    #[serde(default)]
    pub output: OutputConfig,
}

/// Settings shared by every exchange with a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// API port (default: 4028)
    #[serde(default = "default_port")]
    pub port: u16,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read timeout in milliseconds (default: twice the connect timeout)
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,

    /// Socket read size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Responses larger than this are rejected
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: None,
            chunk_size: default_chunk_size(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_response_bytes() -> usize {
    DEFAULT_MAX_RESPONSE_BYTES
}

/// Network discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Run the discovery loop in `run` mode
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address range to scan, e.g. "192.168.1.0/24"
    #[serde(default)]
    pub cidr: Option<String>,

    /// Maximum concurrent probes
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delay between scans in seconds
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,

    /// Delay after a failed scan delivery in seconds
    #[serde(default = "default_recovery_delay")]
    pub recovery_delay_secs: u64,

    /// Largest block accepted
    #[serde(default = "default_max_hosts")]
    pub max_hosts: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cidr: None,
            concurrency: default_concurrency(),
            interval_secs: default_scan_interval(),
            recovery_delay_secs: default_recovery_delay(),
            max_hosts: default_max_hosts(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_scan_interval() -> u64 {
    300
}

fn default_recovery_delay() -> u64 {
    60
}

fn default_max_hosts() -> u64 {
    DEFAULT_MAX_HOSTS
}

/// Polling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between cycles in seconds
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    /// Delay after a loop-level error in seconds
    #[serde(default = "default_recovery_delay")]
    pub recovery_delay_secs: u64,

    /// Also poll `pools`
    #[serde(default)]
    pub include_pools: bool,

    /// Also poll `devs`
    #[serde(default)]
    pub include_devs: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            recovery_delay_secs: default_recovery_delay(),
            include_pools: false,
            include_devs: false,
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

/// A statically configured device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// IP address or hostname, optionally with ":port"
    pub host: String,

    /// API port (default: network.port)
    #[serde(default)]
    pub port: Option<u16>,
}

impl DeviceConfig {
    /// Resolve the device address, falling back to `default_port`.
    pub fn address(&self, default_port: u16) -> Result<Address, ConfigError> {
        let invalid = |reason: String| ConfigError::Device {
            host: self.host.clone(),
            reason,
        };

        let address = Address::parse_with_default_port(&self.host, default_port)
            .map_err(|e| invalid(e.to_string()))?;

        match self.port {
            Some(0) => Err(invalid("port must not be 0".to_string())),
            Some(port) => Ok(Address::new(address.host, port)),
            None if address.port == 0 => Err(invalid("port must not be 0".to_string())),
            None => Ok(address),
        }
    }
}

impl AsicCollectorConfig {
    /// Check every section.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.network.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.network.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("network.connect_timeout_ms"));
        }
        if self.network.read_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroValue("network.read_timeout_ms"));
        }
        if self.network.chunk_size == 0 {
            return Err(ConfigError::ZeroValue("network.chunk_size"));
        }
        if self.scan.concurrency == 0 {
            return Err(ConfigError::ZeroValue("scan.concurrency"));
        }
        if self.polling.interval_secs == 0 {
            return Err(ConfigError::ZeroValue("polling.interval_secs"));
        }

        if let Some(cidr) = &self.scan.cidr {
            self.scanner().plan(cidr)?;
        }

        self.device_addresses()?;
        Ok(())
    }

    /// Protocol client built from the network section.
    pub fn client(&self) -> ProtocolClient {
        let connect = Duration::from_millis(self.network.connect_timeout_ms);
        let client = ProtocolClient::new(connect)
            .with_chunk_size(self.network.chunk_size)
            .with_max_response_bytes(self.network.max_response_bytes);

        match self.network.read_timeout_ms {
            Some(ms) => client.with_read_timeout(Duration::from_millis(ms)),
            None => client,
        }
    }

    /// Scanner built from the network and scan sections.
    pub fn scanner(&self) -> NetworkScanner {
        NetworkScanner::new(self.client(), self.network.port)
            .with_concurrency(self.scan.concurrency)
            .with_max_hosts(self.scan.max_hosts)
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions::new(
            Duration::from_secs(self.polling.interval_secs),
            Duration::from_secs(self.polling.recovery_delay_secs),
            self.polling.include_pools,
            self.polling.include_devs,
        )
    }

    /// Addresses of the statically configured devices.
    pub fn device_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.devices
            .iter()
            .map(|d| d.address(self.network.port))
            .collect()
    }
}

impl CollectorConfig for AsicCollectorConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> minersight_framework::Result<()> {
        self.check()
            .map_err(|e| FrameworkError::validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minersight_common::{Format, LogFormat};

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            logging: { level: "debug", format: "json" },
            network: { port: 4029, connect_timeout_ms: 1500 },
            scan: { cidr: "192.168.1.0/24", concurrency: 20 },
            polling: { interval_secs: 30, include_devs: true },
            devices: [
                { host: "10.0.0.5" },
                { host: "10.0.0.6:4028" },
                { host: "miner-7.local", port: 14028 },
            ],
            output: { format: "cbor", path: "/tmp/minersight.cbor" },
        }"#;

        let config = AsicCollectorConfig::parse(json).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.network.port, 4029);
        assert_eq!(config.scan.concurrency, 20);
        assert!(config.scan.enabled);
        assert_eq!(config.output.format, Format::Cbor);

        let client = config.client();
        assert_eq!(client.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(client.read_timeout(), Duration::from_millis(3000));

        assert_eq!(
            config.device_addresses().unwrap(),
            vec![
                Address::new("10.0.0.5", 4029),
                Address::new("10.0.0.6", 4028),
                Address::new("miner-7.local", 14028),
            ]
        );

        let options = config.poll_options();
        assert_eq!(options.interval, Duration::from_secs(30));
        assert_eq!(options.commands().len(), 3);
    }

    #[test]
    fn test_defaults() {
        let config = AsicCollectorConfig::parse("{}").unwrap();
        assert_eq!(config.network.port, 4028);
        assert_eq!(config.network.connect_timeout_ms, 2000);
        assert_eq!(config.scan.concurrency, 50);
        assert_eq!(config.scan.interval_secs, 300);
        assert_eq!(config.polling.interval_secs, 60);
        assert_eq!(config.polling.recovery_delay_secs, 60);
        assert!(config.devices.is_empty());
        assert!(config.scan.cidr.is_none());
        tokio_test::assert_ok!(config.check());
        assert_eq!(
            config.client().connect_timeout(),
            ProtocolClient::default().connect_timeout()
        );
    }

    #[test]
    fn test_explicit_read_timeout() {
        let config =
            AsicCollectorConfig::parse("{ network: { read_timeout_ms: 750 } }").unwrap();
        assert_eq!(config.client().read_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn test_invalid_cidr_rejected() {
        let result = AsicCollectorConfig::parse(r#"{ scan: { cidr: "10.0.0.0/99" } }"#);
        assert!(matches!(result, Err(FrameworkError::ConfigValidation(_))));

        let result = AsicCollectorConfig::parse(
            r#"{ scan: { cidr: "10.0.0.0/8", max_hosts: 1024 } }"#,
        );
        assert!(matches!(result, Err(FrameworkError::ConfigValidation(_))));
    }

    #[test]
    fn test_zero_values_rejected() {
        let config: AsicCollectorConfig =
            json5::from_str("{ scan: { concurrency: 0 } }").unwrap();
        assert!(matches!(
            config.check(),
            Err(ConfigError::ZeroValue("scan.concurrency"))
        ));

        let config: AsicCollectorConfig = json5::from_str("{ network: { port: 0 } }").unwrap();
        assert!(matches!(config.check(), Err(ConfigError::InvalidPort)));
    }

    #[test]
    fn test_invalid_device_rejected() {
        let config: AsicCollectorConfig =
            json5::from_str(r#"{ devices: [{ host: "10.0.0.5:notaport" }] }"#).unwrap();
        assert!(matches!(config.check(), Err(ConfigError::Device { .. })));
    }
}
