//! Takeover simulation.

use super::device;
use dayflow_core::UserId;
use dayflow_remote::{MemoryRemote, MemoryRemoteConfig, SessionReadPolicy};
use dayflow_sync_engine::SessionState;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Outcome of a takeover run.
#[derive(Debug, Serialize)]
pub struct TakeoverReport {
    /// Device that owns the account at the end.
    pub owner: Option<String>,
    /// Final state of every device, in sign-in order.
    pub devices: Vec<DeviceOutcome>,
}

/// Final state of one device.
#[derive(Debug, Serialize)]
pub struct DeviceOutcome {
    /// Device name.
    pub name: String,
    /// Session state.
    pub session: String,
    /// How many times the device was forced to sign out.
    pub sign_outs: usize,
    /// Takeover notice shown to the user, if any.
    pub notice: Option<String>,
}

impl fmt::Display for TakeoverReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "owner: {}", self.owner.as_deref().unwrap_or("-"))?;
        for device in &self.devices {
            writeln!(
                f,
                "  {:<10} {:<11} sign-outs={}",
                device.name, device.session, device.sign_outs
            )?;
            if let Some(notice) = &device.notice {
                writeln!(f, "             \"{notice}\"")?;
            }
        }
        Ok(())
    }
}

/// Runs the takeover simulation.
pub async fn run(
    root: Option<&Path>,
    devices: usize,
    open_reads: bool,
    gap_ms: u64,
) -> Result<TakeoverReport, Box<dyn std::error::Error>> {
    let policy = if open_reads {
        SessionReadPolicy::Open
    } else {
        SessionReadPolicy::OwnerOnly
    };
    let remote = MemoryRemote::new(
        MemoryRemoteConfig::new()
            .with_write_latency(Duration::from_millis(5))
            .with_session_read_policy(policy),
    );
    let user = UserId::from("demo");

    let mut fleet = Vec::new();
    for i in 0..devices.max(1) {
        let device = device(&remote, &format!("device-{i}"), root)?;
        let notices = device.runtime().subscribe_notices();
        fleet.push((device, notices));
    }

    for (device, _) in &fleet {
        info!(device = device.name(), "signing in");
        device.sign_in(&user);
        tokio::time::sleep(Duration::from_millis(gap_ms)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut outcomes = Vec::new();
    for (device, notices) in &mut fleet {
        let notice = notices.try_recv().ok().map(|n| n.message().to_string());
        outcomes.push(DeviceOutcome {
            name: device.name().to_string(),
            session: device.session().state().to_string(),
            sign_outs: device.auth().sign_out_count(),
            notice,
        });
    }
    for (device, _) in &fleet {
        if device.session().state() == SessionState::Active {
            device.runtime().shutdown().await;
        }
    }

    Ok(TakeoverReport {
        owner: remote.session_owner(&user).map(|d| d.to_string()),
        devices: outcomes,
    })
}
