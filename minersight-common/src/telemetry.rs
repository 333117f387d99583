use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::Error;
use crate::health::ErrorType;

/// Default cgminer-style API port.
pub const DEFAULT_API_PORT: u16 = 4028;

/// A device endpoint: host plus TCP port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    /// IP address or hostname.
    pub host: String,
    /// API port.
    pub port: u16,
}

impl Address {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Create an address from an IP.
    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        Self::new(ip.to_string(), port)
    }

    /// Parse `host`, `host:port`, `ipv6` or `[ipv6]:port`, falling back to
    /// `default_port` when no port is given.
    pub fn parse_with_default_port(s: &str, default_port: u16) -> Result<Self, Error> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidAddress("empty address".to_string()));
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::InvalidAddress(format!("unterminated '[' in '{}'", s)))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port, s)?,
                None if tail.is_empty() => default_port,
                None => return Err(Error::InvalidAddress(format!("unexpected '{}'", tail))),
            };
            return Ok(Self::new(host, port));
        }

        // Bare IPv6 literal has several colons and no brackets.
        if s.parse::<IpAddr>().is_ok() {
            return Ok(Self::new(s, default_port));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => Ok(Self::new(host, parse_port(port, s)?)),
            Some(_) => Err(Error::InvalidAddress(format!("missing host in '{}'", s))),
            None => Ok(Self::new(s, default_port)),
        }
    }

    /// The host parsed as an IP address, if it is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

fn parse_port(port: &str, input: &str) -> Result<u16, Error> {
    port.parse()
        .map_err(|_| Error::InvalidAddress(format!("invalid port in '{}'", input)))
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default_port(s, DEFAULT_API_PORT)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Result of probing and identifying one address during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Probed endpoint.
    pub address: Address,
    /// Inferred manufacturer ("Unknown" when the device answered but matched no signature).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Inferred model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Whether the device accepted a connection and answered the API.
    pub reachable: bool,
    /// Why the device is unreachable or could not be identified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl DeviceRecord {
    /// A device that answered the identification query.
    pub fn identified(address: Address, manufacturer: impl Into<String>, model: Option<String>) -> Self {
        Self {
            address,
            manufacturer: Some(manufacturer.into()),
            model,
            reachable: true,
            failure: None,
        }
    }

    /// A device that could not be reached or did not answer.
    pub fn unreachable(address: Address, failure: impl Into<String>) -> Self {
        Self {
            address,
            manufacturer: None,
            model: None,
            reachable: false,
            failure: Some(failure.into()),
        }
    }
}

/// Raw protocol payloads kept alongside a sample for audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponses {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pools: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devs: Option<serde_json::Value>,
}

/// One point-in-time snapshot of a device's operating metrics.
///
/// All metric fields are optional: a device that does not report a value,
/// or reports it in an unrecognized shape, simply leaves it absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Polled device.
    pub address: Address,

    /// Unix epoch milliseconds, stamped locally when the poll finished.
    pub captured_at: i64,

    /// Hash rate in TH/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_rate_ths: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_shares: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_shares: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_switches: Option<u64>,

    /// Hottest sensor reading in °C.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,

    /// Fastest fan reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_speed: Option<f64>,

    /// Power draw in watts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_watts: Option<f64>,

    /// Unparsed responses.
    #[serde(default)]
    pub raw: RawResponses,
}

impl TelemetrySample {
    /// Create an empty sample stamped with the current time.
    pub fn new(address: Address) -> Self {
        Self::captured_at(address, current_timestamp_millis())
    }

    /// Create an empty sample with an explicit capture time.
    pub fn captured_at(address: Address, captured_at: i64) -> Self {
        Self {
            address,
            captured_at,
            hash_rate_ths: None,
            accepted_shares: None,
            rejected_shares: None,
            pool_switches: None,
            temperature_c: None,
            fan_speed: None,
            power_watts: None,
            raw: RawResponses::default(),
        }
    }
}

/// A device that could not be polled during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFailure {
    pub address: Address,
    /// Command that failed, if the failure happened during an exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub error_type: ErrorType,
    pub message: String,
}

/// Everything one polling cycle produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Sequence number of the cycle, starting at 1.
    pub cycle: u64,
    /// Unix epoch milliseconds when the cycle started.
    pub started_at: i64,
    /// Wall-clock duration of the cycle.
    pub duration_ms: u64,
    pub samples: Vec<TelemetrySample>,
    pub failures: Vec<DeviceFailure>,
}

impl CycleReport {
    /// Number of devices that failed this cycle.
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Number of devices that were polled (successful or not).
    pub fn device_count(&self) -> usize {
        self.samples.len() + self.failures.len()
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parsing() {
        let addr: Address = "192.168.1.10:4029".parse().unwrap();
        assert_eq!(addr, Address::new("192.168.1.10", 4029));

        let addr: Address = "miner-7".parse().unwrap();
        assert_eq!(addr.port, DEFAULT_API_PORT);

        let addr = Address::parse_with_default_port("fe80::1", 4028).unwrap();
        assert_eq!(addr.host, "fe80::1");
        assert_eq!(addr.to_string(), "[fe80::1]:4028");

        let addr: Address = "[::1]:5000".parse().unwrap();
        assert_eq!(addr, Address::new("::1", 5000));
    }

    #[test]
    fn test_address_parsing_errors() {
        assert!("".parse::<Address>().is_err());
        assert!("10.0.0.1:notaport".parse::<Address>().is_err());
        assert!(":4028".parse::<Address>().is_err());
        assert!("[::1".parse::<Address>().is_err());
    }

    #[test]
    fn test_device_record_constructors() {
        let ok = DeviceRecord::identified(Address::new("10.0.0.2", 4028), "AntMiner", None);
        assert!(ok.reachable);
        assert!(ok.failure.is_none());

        let down = DeviceRecord::unreachable(Address::new("10.0.0.3", 4028), "timeout");
        assert!(!down.reachable);
        assert_eq!(down.failure.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_sample_skips_absent_fields() {
        let mut sample = TelemetrySample::captured_at(Address::new("10.0.0.2", 4028), 1_700_000_000_000);
        sample.hash_rate_ths = Some(95.5);

        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["hash_rate_ths"], 95.5);
        assert!(json.get("temperature_c").is_none());
        assert!(json.get("accepted_shares").is_none());
    }

    #[test]
    fn test_cycle_report_counts() {
        let mut report = CycleReport::default();
        report
            .samples
            .push(TelemetrySample::new(Address::new("10.0.0.2", 4028)));
        report.failures.push(DeviceFailure {
            address: Address::new("10.0.0.3", 4028),
            command: Some("summary".to_string()),
            error_type: ErrorType::Timeout,
            message: "read timeout".to_string(),
        });

        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.device_count(), 2);
    }
}
