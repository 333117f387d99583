//! Collector runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;

use minersight_common::{LoggingConfig, init_tracing};

use crate::CollectorArgs;
use crate::config::CollectorConfig;
use crate::error::{FrameworkError, Result};

/// How long workers get to finish after the shutdown signal.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Collector runner that manages the lifecycle of a collector process.
///
/// Handles:
/// - Logging initialization (with CLI override)
/// - Task spawning and management
/// - A shared shutdown signal workers can observe
/// - Graceful shutdown on Ctrl+C: workers are signalled, then joined
///   within a grace period, then aborted
///
/// # Example
///
/// ```ignore
/// let mut runner = CollectorRunner::init("asic", config, Some(&args))?;
/// let shutdown = runner.shutdown_signal();
/// runner.spawn(async move { poller.run(shutdown).await });
/// runner.run().await
/// ```
pub struct CollectorRunner<C: CollectorConfig> {
    /// Collector name for logging.
    name: String,
    /// Collector version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Shutdown broadcast; `true` once shutdown was requested.
    shutdown_tx: watch::Sender<bool>,
    /// Spawned tasks.
    tasks: JoinSet<()>,
    /// Time allowed for workers to wind down.
    grace_period: Duration,
}

impl<C: CollectorConfig> CollectorRunner<C> {
    /// Create a runner without touching the global tracing subscriber.
    pub fn new(name: impl Into<String>, config: C) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            shutdown_tx,
            tasks: JoinSet::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Initialize logging from the configuration (optionally overridden by
    /// CLI args) and create the runner.
    pub fn init(
        name: impl Into<String>,
        config: C,
        args: Option<&CollectorArgs>,
    ) -> Result<Self> {
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| FrameworkError::config(e.to_string()))?;

        let runner = Self::new(name, config);
        tracing::info!(collector = %runner.name, version = %runner.version, "Starting collector");
        Ok(runner)
    }

    /// Override the shutdown grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Get the collector name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the collector version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// A receiver that flips to `true` when shutdown is requested.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a worker task.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    /// Spawn a worker task that returns a Result.
    ///
    /// Errors are logged automatically.
    pub fn spawn_with_error<F, E>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        self.tasks.spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %name, error = %e, "Worker failed");
            }
        });
    }

    /// Run until Ctrl+C is received or every worker has finished.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `stop` resolves or every worker has finished.
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            name,
            shutdown_tx,
            mut tasks,
            grace_period,
            ..
        } = self;

        tracing::info!(
            collector = %name,
            tasks = tasks.len(),
            "Collector running. Press Ctrl+C to stop."
        );

        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => {
                    tracing::info!(collector = %name, "Received shutdown signal");
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(result) => log_join(result),
                    None => {
                        tracing::info!(collector = %name, "All workers finished");
                        return Ok(());
                    }
                },
            }
        }

        // Receivers may already be gone; nothing to signal then.
        let _ = shutdown_tx.send(true);

        let drained = tokio::time::timeout(grace_period, async {
            while let Some(result) = tasks.join_next().await {
                log_join(result);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                collector = %name,
                remaining = tasks.len(),
                grace_secs = grace_period.as_secs(),
                "Workers did not stop in time, aborting"
            );
            tasks.shutdown().await;
        }

        tracing::info!(collector = %name, "Goodbye!");
        Ok(())
    }
}

fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(error = %e, "Worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
    }

    impl CollectorConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }
    }

    fn runner() -> CollectorRunner<TestConfig> {
        CollectorRunner::new(
            "test",
            TestConfig {
                logging: LoggingConfig::default(),
            },
        )
    }

    #[tokio::test]
    async fn test_returns_when_workers_finish() {
        let mut runner = runner();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        runner.spawn(async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio_test::assert_ok!(runner.run_until(std::future::pending()).await);
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_workers_observe_shutdown_signal() {
        let mut runner = runner();
        let mut shutdown = runner.shutdown_signal();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();

        runner.spawn(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            flag.store(true, Ordering::SeqCst);
        });

        let stop = tokio::time::sleep(Duration::from_millis(20));
        tokio_test::assert_ok!(runner.run_until(stop).await);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stuck_workers_are_aborted_after_grace_period() {
        let mut runner = runner().with_grace_period(Duration::from_millis(50));
        runner.spawn(std::future::pending());
        runner.spawn_with_error("failing", async { Err::<(), _>("boom") });

        let started = std::time::Instant::now();
        let stop = tokio::time::sleep(Duration::from_millis(20));
        tokio_test::assert_ok!(runner.run_until(stop).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
