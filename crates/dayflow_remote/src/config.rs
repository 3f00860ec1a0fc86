//! Reference backend configuration.

use std::time::Duration;

/// Who may read a user's session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionReadPolicy {
    /// Only the credential that wrote the record may read it.
    ///
    /// A superseded device's session subscription receives
    /// [`RemoteError::PermissionDenied`](crate::RemoteError::PermissionDenied)
    /// instead of the new record.
    #[default]
    OwnerOnly,
    /// Any device signed in as the user may read the record.
    Open,
}

/// Configuration for [`MemoryRemote`](crate::MemoryRemote).
#[derive(Debug, Clone)]
pub struct MemoryRemoteConfig {
    /// Delay applied to every request before it takes effect.
    pub write_latency: Duration,
    /// Delay between a write and the snapshot reaching subscribers.
    pub notify_delay: Duration,
    /// Read rule for session records.
    pub session_read_policy: SessionReadPolicy,
}

impl MemoryRemoteConfig {
    /// Creates a configuration with no latency and owner-only session reads.
    pub fn new() -> Self {
        Self {
            write_latency: Duration::ZERO,
            notify_delay: Duration::ZERO,
            session_read_policy: SessionReadPolicy::OwnerOnly,
        }
    }

    /// Sets the request latency.
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Sets the notification delay.
    pub fn with_notify_delay(mut self, delay: Duration) -> Self {
        self.notify_delay = delay;
        self
    }

    /// Sets the session read policy.
    pub fn with_session_read_policy(mut self, policy: SessionReadPolicy) -> Self {
        self.session_read_policy = policy;
        self
    }
}

impl Default for MemoryRemoteConfig {
    fn default() -> Self {
        Self::new()
    }
}
