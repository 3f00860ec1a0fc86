//! Configuration for the sync engine and session coordinator.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long an entity stays pending after its push has settled.
    ///
    /// Snapshots that arrive inside this window cannot overwrite the
    /// local copy of the entity.
    pub grace_interval: Duration,
    /// Maximum number of entries kept in `failed_items`.
    pub max_failed_items: usize,
}

impl SyncConfig {
    /// Creates a configuration with a two-second grace interval.
    pub fn new() -> Self {
        Self {
            grace_interval: Duration::from_secs(2),
            max_failed_items: 100,
        }
    }

    /// Sets the grace interval.
    pub fn with_grace_interval(mut self, grace: Duration) -> Self {
        self.grace_interval = grace;
        self
    }

    /// Sets the cap on recorded push failures.
    pub fn with_max_failed_items(mut self, max: usize) -> Self {
        self.max_failed_items = max;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the session coordinator.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Period of the `last_active` heartbeat while a session is active.
    ///
    /// `None` disables the background heartbeat; the foreground hook still
    /// refreshes the record.
    pub heartbeat_interval: Option<Duration>,
}

impl SessionConfig {
    /// Creates a configuration without a background heartbeat.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the background heartbeat.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }
}
