//! Network discovery.
//!
//! A scan runs in three phases:
//!
//! 1. Enumerate the usable hosts of a CIDR block. Invalid or oversized
//!    blocks fail here, before any socket is opened.
//! 2. Probe every host with a TCP connect to the API port.
//! 3. Send `summary` to every host that accepted the connection and
//!    classify the answer.
//!
//! Phases 2 and 3 share one semaphore, so at most `concurrency` sockets are
//! open at any time. Every per-address failure is recorded in that
//! address's [`DeviceRecord`]; none aborts the scan.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use minersight_common::{Address, DeviceRecord};
use minersight_framework::shutdown::{sleep_or_shutdown, wait_for_shutdown};

use crate::cidr::{CidrBlock, CidrError};
use crate::client::{Command, ProtocolClient, QueryError, Response};
use crate::identify::identify;
use crate::sink::DiscoverySink;

/// Default number of concurrent probes.
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Default cap on the number of hosts in one scan.
pub const DEFAULT_MAX_HOSTS: u64 = 65_536;

/// Scan validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("invalid CIDR block: {0}")]
    InvalidCidr(#[from] CidrError),
    #[error("{block} has {hosts} hosts, more than the limit of {max}")]
    TooLarge {
        block: CidrBlock,
        hosts: u128,
        max: u64,
    },
}

/// A validated scan target.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub block: CidrBlock,
    pub addresses: Vec<Address>,
}

/// Probes an address range for miners.
#[derive(Debug, Clone)]
pub struct NetworkScanner {
    client: ProtocolClient,
    port: u16,
    concurrency: usize,
    max_hosts: u64,
}

impl NetworkScanner {
    /// Create a scanner. Probes use the client's connect timeout.
    pub fn new(client: ProtocolClient, port: u16) -> Self {
        Self {
            client,
            port,
            concurrency: DEFAULT_CONCURRENCY,
            max_hosts: DEFAULT_MAX_HOSTS,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_hosts(mut self, max_hosts: u64) -> Self {
        self.max_hosts = max_hosts;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Validate a CIDR block and enumerate its hosts.
    pub fn plan(&self, cidr: &str) -> Result<ScanPlan, ScanError> {
        let block: CidrBlock = cidr.parse()?;
        let hosts = block.host_count();
        if hosts > self.max_hosts as u128 {
            return Err(ScanError::TooLarge {
                block,
                hosts,
                max: self.max_hosts,
            });
        }

        let addresses = block
            .hosts()
            .map(|ip| Address::from_ip(ip, self.port))
            .collect();
        Ok(ScanPlan { block, addresses })
    }

    /// Scan a CIDR block.
    pub async fn scan(&self, cidr: &str) -> Result<Vec<DeviceRecord>, ScanError> {
        let plan = self.plan(cidr)?;
        tracing::info!(
            cidr = %plan.block,
            hosts = plan.addresses.len(),
            port = self.port,
            concurrency = self.concurrency,
            "Starting network scan"
        );
        Ok(self.scan_addresses(plan.addresses).await)
    }

    /// Probe and identify an explicit list of addresses.
    ///
    /// Records come back sorted by address.
    pub async fn scan_addresses(&self, addresses: Vec<Address>) -> Vec<DeviceRecord> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut records = Vec::with_capacity(addresses.len());

        let client = self.client.clone();
        let probes = bounded_fan_out(addresses, &semaphore, |address| {
            let client = client.clone();
            async move { client.probe(&address).await }
        })
        .await;

        let mut reachable = Vec::new();
        for (address, outcome) in probes {
            match outcome {
                Ok(Ok(())) => reachable.push(address),
                Ok(Err(e)) => {
                    tracing::trace!(device = %address, error = %e, "Probe failed");
                    records.push(DeviceRecord::unreachable(address, e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(device = %address, error = %e, "Probe task failed");
                    records.push(DeviceRecord::unreachable(address, format!("probe failed: {}", e)));
                }
            }
        }

        tracing::debug!(reachable = reachable.len(), "Reachability probe finished");

        let identifications = bounded_fan_out(reachable, &semaphore, |address| {
            let client = client.clone();
            async move { client.query(&address, Command::Summary).await }
        })
        .await;

        for (address, outcome) in identifications {
            records.push(identification_record(address, outcome));
        }

        records.sort_by(|a, b| {
            (a.address.ip(), a.address.port, &a.address.host)
                .cmp(&(b.address.ip(), b.address.port, &b.address.host))
        });

        let found = records.iter().filter(|r| r.reachable).count();
        tracing::info!(
            scanned = records.len(),
            found,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Network scan finished"
        );

        records
    }

    /// Re-scan `cidr` every `interval` and hand the records to `sink` until
    /// shutdown is requested.
    ///
    /// The block is validated once up front; afterwards no error ends the
    /// loop. A failing sink is logged and retried after `recovery_delay`.
    pub async fn run<S: DiscoverySink>(
        &self,
        cidr: &str,
        interval: Duration,
        recovery_delay: Duration,
        sink: &S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ScanError> {
        let plan = self.plan(cidr)?;

        tracing::info!(
            cidr = %plan.block,
            interval_secs = interval.as_secs(),
            "Discovery loop started"
        );

        loop {
            let records = tokio::select! {
                records = self.scan_addresses(plan.addresses.clone()) => records,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            let delay = match sink.deliver_devices(&records) {
                Ok(()) => interval,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to deliver scan results");
                    recovery_delay
                }
            };

            if sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }

        tracing::info!("Discovery loop stopped");
        Ok(())
    }
}

fn identification_record(
    address: Address,
    outcome: Result<Result<Response, QueryError>, String>,
) -> DeviceRecord {
    match outcome {
        Ok(Ok(response)) => {
            let id = identify(response.payload());
            tracing::debug!(
                device = %address,
                manufacturer = id.manufacturer(),
                model = id.model().unwrap_or("-"),
                "Device identified"
            );
            DeviceRecord::identified(address, id.manufacturer(), id.model().map(str::to_string))
        }
        Ok(Err(e)) => {
            tracing::debug!(device = %address, error = %e, "Identification query failed");
            DeviceRecord::unreachable(address, format!("identification failed: {}", e))
        }
        Err(e) => {
            tracing::warn!(device = %address, error = %e, "Identification task failed");
            DeviceRecord::unreachable(address, format!("identification failed: {}", e))
        }
    }
}

/// Run `task` for every address with at most `semaphore`'s permits in
/// flight, and collect one outcome per address. A panicking task is
/// reported as an `Err` for its address instead of tearing down the scan.
async fn bounded_fan_out<T, F, Fut>(
    addresses: Vec<Address>,
    semaphore: &Arc<Semaphore>,
    task: F,
) -> Vec<(Address, Result<T, String>)>
where
    F: Fn(Address) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut tasks = JoinSet::new();
    let mut pending = HashMap::with_capacity(addresses.len());
    let mut outcomes = Vec::with_capacity(addresses.len());

    for address in addresses {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                outcomes.push((address, Err(e.to_string())));
                continue;
            }
        };

        let work = task(address.clone());
        let handle = tasks.spawn(async move {
            let _permit = permit;
            work.await
        });
        pending.insert(handle.id(), address);
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, value)) => {
                if let Some(address) = pending.remove(&id) {
                    outcomes.push((address, Ok(value)));
                }
            }
            Err(e) => {
                if let Some(address) = pending.remove(&e.id()) {
                    outcomes.push((address, Err(e.to_string())));
                }
            }
        }
    }

    outcomes
}
