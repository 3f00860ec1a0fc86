//! Async wait helpers for tests running on a paused tokio clock.

use dayflow_sync_engine::{SyncConfig, SyncEngine};
use std::time::Duration;

/// How often [`wait_until`] re-checks its condition.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Sleeps long enough for every push to settle and every grace timer to
/// fire, given the backend's worst-case `latency`.
pub async fn settle(config: &SyncConfig, latency: Duration) {
    tokio::time::sleep(config.grace_interval + latency * 4 + Duration::from_millis(100)).await;
}

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition was met.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Waits until the engine's read model has moved past `revision`.
///
/// Returns the new revision, or `None` on timeout.
pub async fn wait_for_revision(
    engine: &SyncEngine,
    revision: u64,
    timeout: Duration,
) -> Option<u64> {
    let mut rx = engine.read_model().subscribe();
    let changed = tokio::time::timeout(timeout, rx.wait_for(|current| *current > revision)).await;
    match changed {
        Ok(Ok(current)) => Some(*current),
        _ => None,
    }
}

/// Waits until the engine has nothing pending and nothing in flight.
pub async fn wait_for_quiet(engine: &SyncEngine, timeout: Duration) -> bool {
    wait_until(timeout, || {
        engine.pending().is_empty() && engine.sync_status().pending_count == 0
    })
    .await
}
