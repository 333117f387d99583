//! Periodic telemetry collection.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;

use minersight_common::{
    Address, CycleReport, DeviceFailure, ErrorType, RawResponses, TelemetrySample,
    current_timestamp_millis,
};
use minersight_framework::CollectorHealth;
use minersight_framework::shutdown::{is_shutdown, sleep_or_shutdown};

use crate::client::{Command, ProtocolClient};
use crate::parser::build_sample;
use crate::registry::{DeviceSource, RegistryError};
use crate::sink::{SinkError, TelemetrySink};

/// Default delay between cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default delay after a loop-level error.
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_secs(60);

/// Loop-level errors. Per-device failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("failed to read active devices: {0}")]
    Registry(#[from] RegistryError),
    #[error("failed to deliver cycle: {0}")]
    Sink(#[from] SinkError),
}

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Stopped,
    Running,
}

/// Scheduling and command selection for the polling loop.
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub recovery_delay: Duration,
    commands: Vec<Command>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_RECOVERY_DELAY, false, false)
    }
}

impl PollOptions {
    /// `summary` and `stats` are always polled; `pools` and `devs` are
    /// optional.
    pub fn new(
        interval: Duration,
        recovery_delay: Duration,
        include_pools: bool,
        include_devs: bool,
    ) -> Self {
        let mut commands = vec![Command::Summary, Command::Stats];
        if include_pools {
            commands.push(Command::Pools);
        }
        if include_devs {
            commands.push(Command::Devs);
        }
        Self {
            interval,
            recovery_delay,
            commands,
        }
    }

    /// Commands issued to every device, in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

/// Polls every active device once per cycle and hands each cycle to a sink.
///
/// The active set is read from the [`DeviceSource`] at the start of every
/// cycle. Each device gets its own task, so a slow or dead device costs at
/// most its own timeouts and never delays the others.
pub struct PollingOrchestrator<S, K> {
    source: Arc<S>,
    sink: Arc<K>,
    client: ProtocolClient,
    options: PollOptions,
    health: Arc<CollectorHealth>,
    cycles: AtomicU64,
    running: AtomicBool,
}

impl<S, K> PollingOrchestrator<S, K>
where
    S: DeviceSource + 'static,
    K: TelemetrySink,
{
    pub fn new(source: Arc<S>, sink: Arc<K>, client: ProtocolClient, options: PollOptions) -> Self {
        Self {
            source,
            sink,
            client,
            options,
            health: Arc::new(CollectorHealth::new("asic")),
            cycles: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Share a health tracker with other components.
    pub fn with_health(mut self, health: Arc<CollectorHealth>) -> Self {
        self.health = health;
        self
    }

    pub fn health(&self) -> &Arc<CollectorHealth> {
        &self.health
    }

    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    pub fn state(&self) -> OrchestratorState {
        if self.running.load(Ordering::SeqCst) {
            OrchestratorState::Running
        } else {
            OrchestratorState::Stopped
        }
    }

    /// Number of cycles collected so far.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Poll every active device once and return the cycle, without
    /// delivering it.
    pub async fn collect_cycle(&self) -> Result<CycleReport, PollerError> {
        let started_at = current_timestamp_millis();
        let started = Instant::now();

        let mut devices = self.source.active_devices()?;
        devices.sort();
        devices.dedup();

        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(devices.len());
        for address in &devices {
            let handle = tasks.spawn(poll_device(
                self.client.clone(),
                self.source.clone(),
                address.clone(),
                self.options.commands.clone(),
            ));
            pending.insert(handle.id(), address.clone());
        }

        let mut samples = Vec::with_capacity(devices.len());
        let mut failures = Vec::new();

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, Ok(sample))) => samples.push(sample),
                Ok((_, Err(failure))) => failures.push(failure),
                Err(e) => {
                    if let Some(address) = pending.remove(&e.id()) {
                        tracing::error!(device = %address, error = %e, "Device poll task failed");
                        failures.push(DeviceFailure {
                            address,
                            command: None,
                            error_type: ErrorType::Other,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        samples.sort_by(|a, b| a.address.cmp(&b.address));
        failures.sort_by(|a, b| a.address.cmp(&b.address));

        self.update_health(&devices, &samples, &failures);

        let duration_ms = started.elapsed().as_millis() as u64;
        self.health.record_cycle_duration(duration_ms);

        Ok(CycleReport {
            cycle: self.cycles.fetch_add(1, Ordering::SeqCst) + 1,
            started_at,
            duration_ms,
            samples,
            failures,
        })
    }

    /// Poll every active device once and deliver the cycle to the sink.
    pub async fn poll_cycle(&self) -> Result<CycleReport, PollerError> {
        let report = self.collect_cycle().await?;
        self.sink.deliver_cycle(report.clone())?;
        self.health
            .record_samples_published(report.samples.len() as u64);
        Ok(report)
    }

    /// Poll until shutdown is requested.
    ///
    /// Fixed delay: the interval starts when a cycle ends. A loop-level
    /// error is logged and followed by the recovery delay. Shutdown is only
    /// observed between cycles, so in-flight device polls finish (or time
    /// out) first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            interval_secs = self.options.interval.as_secs(),
            commands = ?self.options.commands,
            "Polling started"
        );

        while !is_shutdown(&shutdown) {
            let delay = match self.poll_cycle().await {
                Ok(report) => {
                    let health = self.health.snapshot();
                    tracing::info!(
                        cycle = report.cycle,
                        devices = report.device_count(),
                        samples = report.samples.len(),
                        failures = report.failure_count(),
                        duration_ms = report.duration_ms,
                        status = %health.status,
                        offline = health.devices_failed,
                        "Poll cycle complete"
                    );
                    self.options.interval
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        retry_secs = self.options.recovery_delay.as_secs(),
                        "Poll cycle failed"
                    );
                    self.options.recovery_delay
                }
            };

            if sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!(cycles = self.cycles_completed(), "Polling stopped");
    }

    fn update_health(
        &self,
        devices: &[Address],
        samples: &[TelemetrySample],
        failures: &[DeviceFailure],
    ) {
        for sample in samples {
            self.health.record_device_success(&sample.address.to_string());
        }
        for failure in failures {
            let device = failure.address.to_string();
            if failure.error_type.is_retryable() {
                self.health.record_device_failure(&device, &failure.message);
            } else {
                self.health.forget_device(&device);
            }
        }

        let active: BTreeSet<String> = devices.iter().map(|a| a.to_string()).collect();
        for liveness in self.health.all_device_liveness() {
            if !active.contains(&liveness.device) {
                self.health.forget_device(&liveness.device);
            }
        }
    }
}

/// Run the command sequence against one device.
///
/// A failed or refused `summary` fails the device. Other commands only
/// degrade their own fields.
async fn poll_device<S: DeviceSource>(
    client: ProtocolClient,
    source: Arc<S>,
    address: Address,
    commands: Vec<Command>,
) -> Result<TelemetrySample, DeviceFailure> {
    if !source.is_registered(&address) {
        return Err(DeviceFailure {
            address,
            command: None,
            error_type: ErrorType::NotRegistered,
            message: "device is no longer registered".to_string(),
        });
    }

    let mut raw = RawResponses::default();

    for command in commands {
        let response = match client.query(&address, command).await {
            Ok(response) => response,
            Err(e) if command == Command::Summary => {
                tracing::warn!(device = %address, command = %command, error = %e, "Device poll failed");
                return Err(DeviceFailure {
                    address,
                    command: Some(command.to_string()),
                    error_type: e.error_type(),
                    message: e.to_string(),
                });
            }
            Err(e) => {
                tracing::debug!(device = %address, command = %command, error = %e, "Command failed");
                continue;
            }
        };

        if let Some(status) = response.status().filter(|s| s.is_refusal()) {
            let reason = status.message.unwrap_or_else(|| "no message".to_string());
            if command == Command::Summary {
                tracing::warn!(device = %address, command = %command, reason = %reason, "Command refused");
                return Err(DeviceFailure {
                    address,
                    command: Some(command.to_string()),
                    error_type: ErrorType::ProtocolError,
                    message: format!("{} refused: {}", command, reason),
                });
            }
            tracing::debug!(device = %address, command = %command, reason = %reason, "Command refused");
            continue;
        }

        let payload = Some(response.into_payload());
        match command {
            Command::Summary => raw.summary = payload,
            Command::Stats => raw.stats = payload,
            Command::Pools => raw.pools = payload,
            Command::Devs => raw.devs = payload,
        }
    }

    source.mark_seen(&address);
    Ok(build_sample(address, current_timestamp_millis(), raw))
}
