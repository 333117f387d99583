//! Collector health monitoring.
//!
//! [`CollectorHealth`] tracks overall collector metrics and per-device
//! liveness. It is shared between polling tasks behind an `Arc`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use minersight_common::{DeviceLiveness, DeviceStatus, HealthSnapshot};

/// Consecutive failures after which a device is considered offline.
pub const OFFLINE_AFTER_FAILURES: u32 = 3;

/// Collector health metrics.
#[derive(Debug)]
pub struct CollectorHealth {
    /// Collector name.
    name: String,
    /// Start time for uptime calculation.
    start_time: Instant,
    /// Devices currently responding.
    devices_responding: AtomicU64,
    /// Devices currently failed.
    devices_failed: AtomicU64,
    /// Total samples handed to the sink.
    samples_published: AtomicU64,
    /// Per-device errors since start.
    errors_total: AtomicU64,
    /// Last cycle duration in milliseconds.
    last_cycle_duration_ms: AtomicU64,
    /// Per-device liveness tracking.
    devices: RwLock<HashMap<String, DeviceState>>,
}

#[derive(Debug, Clone)]
struct DeviceState {
    status: DeviceStatus,
    last_seen: i64,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            status: DeviceStatus::Unknown,
            last_seen: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

impl CollectorHealth {
    /// Create a new health tracker.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time: Instant::now(),
            devices_responding: AtomicU64::new(0),
            devices_failed: AtomicU64::new(0),
            samples_published: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            last_cycle_duration_ms: AtomicU64::new(0),
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Collector name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn read_devices(&self) -> RwLockReadGuard<'_, HashMap<String, DeviceState>> {
        self.devices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_devices(&self) -> RwLockWriteGuard<'_, HashMap<String, DeviceState>> {
        self.devices.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that a device poll succeeded.
    pub fn record_device_success(&self, device_id: &str) {
        {
            let mut devices = self.write_devices();
            let state = devices.entry(device_id.to_string()).or_default();
            state.status = DeviceStatus::Online;
            state.last_seen = chrono::Utc::now().timestamp_millis();
            state.consecutive_failures = 0;
            state.last_error = None;
        }
        self.update_device_counters();
    }

    /// Record that a device poll failed.
    pub fn record_device_failure(&self, device_id: &str, error: &str) {
        {
            let mut devices = self.write_devices();
            let state = devices.entry(device_id.to_string()).or_default();
            state.consecutive_failures += 1;
            state.last_error = Some(error.to_string());
            state.status = if state.consecutive_failures >= OFFLINE_AFTER_FAILURES {
                DeviceStatus::Offline
            } else {
                DeviceStatus::Degraded
            };
        }
        self.update_device_counters();
        self.errors_total.fetch_add(1, Ordering::SeqCst);
    }

    /// Stop tracking a device that left the active set.
    pub fn forget_device(&self, device_id: &str) {
        self.write_devices().remove(device_id);
        self.update_device_counters();
    }

    fn update_device_counters(&self) {
        let devices = self.read_devices();
        let mut responding = 0u64;
        let mut failed = 0u64;

        for state in devices.values() {
            match state.status {
                DeviceStatus::Online | DeviceStatus::Degraded => responding += 1,
                DeviceStatus::Offline => failed += 1,
                DeviceStatus::Unknown => {}
            }
        }

        self.devices_responding.store(responding, Ordering::SeqCst);
        self.devices_failed.store(failed, Ordering::SeqCst);
    }

    /// Record that samples were handed to the sink.
    pub fn record_samples_published(&self, count: u64) {
        self.samples_published.fetch_add(count, Ordering::SeqCst);
    }

    /// Record how long the last cycle took.
    pub fn record_cycle_duration(&self, duration_ms: u64) {
        self.last_cycle_duration_ms
            .store(duration_ms, Ordering::SeqCst);
    }

    /// Get a snapshot of current health metrics.
    pub fn snapshot(&self) -> HealthSnapshot {
        let devices_total = self.read_devices().len() as u64;
        let devices_responding = self.devices_responding.load(Ordering::SeqCst);
        let devices_failed = self.devices_failed.load(Ordering::SeqCst);

        let status = if devices_failed == 0 {
            "healthy"
        } else if devices_responding > 0 {
            "degraded"
        } else {
            "error"
        };

        HealthSnapshot {
            collector: self.name.clone(),
            status: status.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            devices_total,
            devices_responding,
            devices_failed,
            last_cycle_duration_ms: self.last_cycle_duration_ms.load(Ordering::SeqCst),
            errors_total: self.errors_total.load(Ordering::SeqCst),
            samples_published: self.samples_published.load(Ordering::SeqCst),
        }
    }

    /// Get liveness info for a specific device.
    pub fn device_liveness(&self, device_id: &str) -> Option<DeviceLiveness> {
        self.read_devices()
            .get(device_id)
            .map(|state| to_liveness(device_id, state))
    }

    /// Get liveness info for all devices, sorted by device id.
    pub fn all_device_liveness(&self) -> Vec<DeviceLiveness> {
        let mut all: Vec<_> = self
            .read_devices()
            .iter()
            .map(|(id, state)| to_liveness(id, state))
            .collect();
        all.sort_by(|a, b| a.device.cmp(&b.device));
        all
    }
}

fn to_liveness(device_id: &str, state: &DeviceState) -> DeviceLiveness {
    DeviceLiveness {
        device: device_id.to_string(),
        status: state.status,
        last_seen: state.last_seen,
        consecutive_failures: state.consecutive_failures,
        last_error: state.last_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_goes_offline_after_repeated_failures() {
        let health = CollectorHealth::new("asic");

        health.record_device_failure("10.0.0.2:4028", "timeout");
        assert_eq!(
            health.device_liveness("10.0.0.2:4028").unwrap().status,
            DeviceStatus::Degraded
        );

        health.record_device_failure("10.0.0.2:4028", "timeout");
        health.record_device_failure("10.0.0.2:4028", "timeout");
        let liveness = health.device_liveness("10.0.0.2:4028").unwrap();
        assert_eq!(liveness.status, DeviceStatus::Offline);
        assert_eq!(liveness.consecutive_failures, 3);
        assert_eq!(liveness.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_success_resets_failures() {
        let health = CollectorHealth::new("asic");

        health.record_device_failure("10.0.0.2:4028", "refused");
        health.record_device_success("10.0.0.2:4028");

        let liveness = health.device_liveness("10.0.0.2:4028").unwrap();
        assert_eq!(liveness.status, DeviceStatus::Online);
        assert_eq!(liveness.consecutive_failures, 0);
        assert!(liveness.last_error.is_none());
        assert!(liveness.last_seen > 0);
    }

    #[test]
    fn test_snapshot_status() {
        let health = CollectorHealth::new("asic");
        assert_eq!(health.snapshot().status, "healthy");

        health.record_device_success("a");
        for _ in 0..OFFLINE_AFTER_FAILURES {
            health.record_device_failure("b", "timeout");
        }
        health.record_samples_published(1);
        health.record_cycle_duration(420);

        let snapshot = health.snapshot();
        assert_eq!(snapshot.status, "degraded");
        assert_eq!(snapshot.devices_total, 2);
        assert_eq!(snapshot.devices_responding, 1);
        assert_eq!(snapshot.devices_failed, 1);
        assert_eq!(snapshot.errors_total, 3);
        assert_eq!(snapshot.samples_published, 1);
        assert_eq!(snapshot.last_cycle_duration_ms, 420);

        health.forget_device("a");
        assert_eq!(health.snapshot().status, "error");
    }

    #[test]
    fn test_all_device_liveness_sorted() {
        let health = CollectorHealth::new("asic");
        health.record_device_success("10.0.0.9:4028");
        health.record_device_success("10.0.0.10:4028");

        let devices: Vec<_> = health
            .all_device_liveness()
            .into_iter()
            .map(|d| d.device)
            .collect();
        assert_eq!(devices, vec!["10.0.0.10:4028", "10.0.0.9:4028"]);
    }
}
