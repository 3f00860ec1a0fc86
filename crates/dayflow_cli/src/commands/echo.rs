//! Echo-suppression simulation.

use super::device;
use dayflow_core::{EntityDraft, EntityKind, Fields, UserId};
use dayflow_remote::{MemoryRemote, MemoryRemoteConfig};
use dayflow_testkit::{wait_for_quiet, wait_until};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::sync::oneshot;

/// Outcome of an echo run.
#[derive(Debug, Serialize)]
pub struct EchoReport {
    /// Titles written, in order.
    pub written: Vec<String>,
    /// Title shown locally after each read-model change.
    pub observed: Vec<String>,
    /// Times the local title went back to an older value.
    pub reverts: usize,
    /// Final local title.
    pub final_local: Option<String>,
    /// Final remote title.
    pub final_remote: Option<String>,
}

impl fmt::Display for EchoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "written:  {}", self.written.join(" -> "))?;
        writeln!(f, "observed: {}", self.observed.join(" -> "))?;
        writeln!(f, "reverts:  {}", self.reverts)?;
        writeln!(
            f,
            "final:    local={} remote={}",
            self.final_local.as_deref().unwrap_or("-"),
            self.final_remote.as_deref().unwrap_or("-")
        )
    }
}

/// Runs the echo simulation.
pub async fn run(
    root: Option<&Path>,
    edits: usize,
    notify_delay_ms: u64,
) -> Result<EchoReport, Box<dyn std::error::Error>> {
    let remote = MemoryRemote::new(
        MemoryRemoteConfig::new().with_notify_delay(Duration::from_millis(notify_delay_ms)),
    );
    let user = UserId::from("demo");
    let device = device(&remote, "phone", root)?;
    let engine = device.engine().clone();

    device.sign_in(&user);
    wait_until(Duration::from_secs(5), || engine.subscription_count() > 0).await;

    let todo = engine
        .save_data(EntityKind::Todo, EntityDraft::new().field("title", "v0"))
        .await?;
    let mut written = vec!["v0".to_string()];

    let (stop, mut stopped) = oneshot::channel::<()>();
    let observer = {
        let engine = engine.clone();
        let id = todo.id.clone();
        let mut revisions = engine.read_model().subscribe();
        tokio::spawn(async move {
            let mut seen: Vec<String> = Vec::new();
            loop {
                tokio::select! {
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = &mut stopped => break,
                }
                let title = engine
                    .todos()
                    .into_iter()
                    .find(|e| e.id == id)
                    .and_then(|e| e.get_str("title").map(str::to_string));
                if let Some(title) = title {
                    if seen.last() != Some(&title) {
                        seen.push(title);
                    }
                }
            }
            seen
        })
    };

    for i in 1..=edits {
        let title = format!("v{i}");
        let mut patch = Fields::new();
        patch.insert("title".into(), json!(title));
        engine.update_data(EntityKind::Todo, &todo.id, &patch).await?;
        written.push(title);
        tokio::time::sleep(Duration::from_millis(notify_delay_ms / 3 + 1)).await;
    }
    tokio::time::sleep(Duration::from_millis(notify_delay_ms * 2)).await;
    wait_for_quiet(&engine, Duration::from_secs(10)).await;

    let final_remote = remote
        .entities(&user, EntityKind::Todo)
        .into_iter()
        .find(|e| e.id == todo.id)
        .and_then(|e| e.get_str("title").map(str::to_string));
    let final_local = engine
        .todos()
        .into_iter()
        .find(|e| e.id == todo.id)
        .and_then(|e| e.get_str("title").map(str::to_string));

    let _ = stop.send(());
    let observed = observer.await.unwrap_or_default();
    device.runtime().shutdown().await;
    let reverts = count_reverts(&written, &observed);

    Ok(EchoReport {
        written,
        observed,
        reverts,
        final_local,
        final_remote,
    })
}

/// Counts observations that moved to an earlier position in `written`.
fn count_reverts(written: &[String], observed: &[String]) -> usize {
    let positions: Vec<usize> = observed
        .iter()
        .filter_map(|title| written.iter().position(|w| w == title))
        .collect();
    positions.windows(2).filter(|pair| pair[1] < pair[0]).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reverts_are_backward_moves() {
        let written = titles(&["v0", "v1", "v2", "v3"]);
        assert_eq!(count_reverts(&written, &titles(&["v1", "v2", "v3"])), 0);
        assert_eq!(count_reverts(&written, &titles(&["v2", "v1", "v3"])), 1);
    }
}
