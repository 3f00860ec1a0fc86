//! Offline-then-login simulation.

use super::device;
use dayflow_core::{EntityDraft, EntityKind, UserId};
use dayflow_remote::MemoryRemote;
use dayflow_testkit::{wait_for_quiet, wait_until};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Outcome of an offline run.
#[derive(Debug, Serialize)]
pub struct OfflineReport {
    /// Todos visible locally before signing in.
    pub local_before_login: usize,
    /// In-flight pushes before signing in.
    pub pending_before_login: usize,
    /// Todos in the remote store after signing in.
    pub remote_after_login: usize,
    /// Todos visible locally after signing in.
    pub local_after_login: usize,
    /// Pushes that failed.
    pub failed: usize,
}

impl OfflineReport {
    /// Returns true if every offline write reached the remote store.
    pub fn converged(&self) -> bool {
        self.failed == 0
            && self.remote_after_login == self.local_before_login
            && self.local_after_login == self.local_before_login
    }
}

impl fmt::Display for OfflineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "before login: {} local, {} pending",
            self.local_before_login, self.pending_before_login
        )?;
        writeln!(
            f,
            "after login:  {} local, {} remote, {} failed",
            self.local_after_login, self.remote_after_login, self.failed
        )?;
        writeln!(f, "converged: {}", self.converged())
    }
}

/// Runs the offline simulation.
pub async fn run(
    root: Option<&Path>,
    todos: usize,
) -> Result<OfflineReport, Box<dyn std::error::Error>> {
    let remote = MemoryRemote::default();
    let user = UserId::from("demo");
    let device = device(&remote, "phone", root)?;
    let engine = device.engine();

    for i in 0..todos {
        engine
            .save_data(
                EntityKind::Todo,
                EntityDraft::new().field("title", format!("offline todo {i}")),
            )
            .await?;
    }
    let local_before_login = engine.todos().len();
    let pending_before_login = engine.sync_status().pending_count;

    device.sign_in(&user);
    wait_until(Duration::from_secs(5), || {
        remote.entities(&user, EntityKind::Todo).len() >= local_before_login
    })
    .await;
    wait_for_quiet(engine, Duration::from_secs(5)).await;

    let report = OfflineReport {
        local_before_login,
        pending_before_login,
        remote_after_login: remote.entities(&user, EntityKind::Todo).len(),
        local_after_login: engine.todos().len(),
        failed: engine.sync_status().failed_items.len(),
    };
    device.runtime().shutdown().await;
    Ok(report)
}
