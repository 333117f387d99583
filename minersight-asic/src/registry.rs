//! Registry of known devices.
//!
//! The registry is the only long-lived device state. The scanner feeds it
//! through [`DiscoverySink`], the polling orchestrator reads the active set
//! through [`DeviceSource`] at the start of every cycle, so additions and
//! removals take effect on the next cycle.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use minersight_common::{Address, DeviceRecord, current_timestamp_millis};

use crate::identify::UNKNOWN_MANUFACTURER;
use crate::sink::{DiscoverySink, SinkError};

/// Registry access errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("device registry unavailable: {0}")]
    Unavailable(String),
}

/// Read accessor for the set of devices to poll.
pub trait DeviceSource: Send + Sync {
    /// Devices currently marked active.
    fn active_devices(&self) -> Result<Vec<Address>, RegistryError>;

    /// Whether the device is still registered and active.
    fn is_registered(&self, address: &Address) -> bool;

    /// Called after a successful poll.
    fn mark_seen(&self, _address: &Address) {}
}

/// A device the registry knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredDevice {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Whether the device is polled.
    pub active: bool,
    /// Reachability at the last scan.
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Unix epoch milliseconds.
    pub first_seen: i64,
    /// Unix epoch milliseconds of the last successful poll or scan.
    pub last_seen: i64,
}

/// What [`DeviceRegistry::upsert`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Unreachable record for an address the registry does not know.
    Ignored,
}

/// Devices keyed by address.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<Address, RegisteredDevice>>,
}

fn is_identified(manufacturer: Option<&str>) -> bool {
    manufacturer.is_some_and(|m| m != UNKNOWN_MANUFACTURER)
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with statically configured devices, all active.
    pub fn with_devices(addresses: impl IntoIterator<Item = Address>) -> Self {
        let registry = Self::new();
        for address in addresses {
            registry.add(address);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Address, RegisteredDevice>> {
        self.devices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<Address, RegisteredDevice>> {
        self.devices.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a device by hand. Existing entries are reactivated.
    pub fn add(&self, address: Address) {
        let now = current_timestamp_millis();
        self.write()
            .entry(address.clone())
            .and_modify(|d| d.active = true)
            .or_insert_with(|| RegisteredDevice {
                address,
                manufacturer: None,
                model: None,
                active: true,
                reachable: true,
                failure: None,
                first_seen: now,
                last_seen: 0,
            });
    }

    /// Merge a scan record by address.
    ///
    /// Reachable records for new addresses are inserted as active. For known
    /// addresses, reachability and failure reason are replaced, while an
    /// identified manufacturer/model is never overwritten by an unidentified
    /// one. The active flag is left to the operator.
    pub fn upsert(&self, record: &DeviceRecord) -> UpsertOutcome {
        let now = current_timestamp_millis();
        let mut devices = self.write();

        match devices.get_mut(&record.address) {
            Some(existing) => {
                existing.reachable = record.reachable;
                existing.failure = record.failure.clone();
                if record.reachable {
                    existing.last_seen = now;
                }

                let incoming = record.manufacturer.as_deref();
                if is_identified(incoming) || !is_identified(existing.manufacturer.as_deref()) {
                    if incoming.is_some() {
                        existing.manufacturer = record.manufacturer.clone();
                    }
                    if record.model.is_some() {
                        existing.model = record.model.clone();
                    }
                }
                UpsertOutcome::Updated
            }
            None if !record.reachable => UpsertOutcome::Ignored,
            None => {
                devices.insert(
                    record.address.clone(),
                    RegisteredDevice {
                        address: record.address.clone(),
                        manufacturer: record.manufacturer.clone(),
                        model: record.model.clone(),
                        active: true,
                        reachable: true,
                        failure: record.failure.clone(),
                        first_seen: now,
                        last_seen: now,
                    },
                );
                UpsertOutcome::Inserted
            }
        }
    }

    /// Merge a batch of scan records. Returns how many were inserted.
    pub fn upsert_all(&self, records: &[DeviceRecord]) -> usize {
        records
            .iter()
            .filter(|r| self.upsert(r) == UpsertOutcome::Inserted)
            .count()
    }

    /// Enable or disable polling of a device. Returns false if unknown.
    pub fn set_active(&self, address: &Address, active: bool) -> bool {
        match self.write().get_mut(address) {
            Some(device) => {
                device.active = active;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, address: &Address) -> Option<RegisteredDevice> {
        self.write().remove(address)
    }

    pub fn get(&self, address: &Address) -> Option<RegisteredDevice> {
        self.read().get(address).cloned()
    }

    /// Snapshot of every device, ordered by address.
    pub fn list(&self) -> Vec<RegisteredDevice> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl DeviceSource for DeviceRegistry {
    fn active_devices(&self) -> Result<Vec<Address>, RegistryError> {
        Ok(self
            .read()
            .values()
            .filter(|d| d.active)
            .map(|d| d.address.clone())
            .collect())
    }

    fn is_registered(&self, address: &Address) -> bool {
        self.read().get(address).is_some_and(|d| d.active)
    }

    fn mark_seen(&self, address: &Address) {
        if let Some(device) = self.write().get_mut(address) {
            device.last_seen = current_timestamp_millis();
            device.reachable = true;
            device.failure = None;
        }
    }
}

impl DiscoverySink for DeviceRegistry {
    fn deliver_devices(&self, records: &[DeviceRecord]) -> Result<(), SinkError> {
        let inserted = self.upsert_all(records);
        if inserted > 0 {
            tracing::info!(inserted, total = self.len(), "New devices registered");
        }
        Ok(())
    }
}

/// A fixed device list, for polling without a registry.
impl DeviceSource for Vec<Address> {
    fn active_devices(&self) -> Result<Vec<Address>, RegistryError> {
        Ok(self.clone())
    }

    fn is_registered(&self, address: &Address) -> bool {
        self.contains(address)
    }
}
