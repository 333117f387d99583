//! Helpers for workers observing the runner's shutdown signal.

use std::time::Duration;

use tokio::sync::watch;

/// Wait until shutdown is requested.
///
/// A closed channel counts as a shutdown request: nobody is left to send one.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay` unless shutdown is requested first.
///
/// Returns `true` when the sleep was cut short by shutdown.
pub async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = wait_for_shutdown(shutdown) => true,
    }
}

/// Whether shutdown has been requested (or can no longer be signalled).
pub fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
