//! Sync state and push bookkeeping.

use dayflow_core::{EntityId, EntityKind, Timestamp};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No identity; mutations stay local.
    SignedOut,
    /// Pulling remote collections into the local stores.
    Bootstrapping,
    /// Live subscriptions are installed.
    Live,
}

impl SyncState {
    /// Returns true while a bootstrap is running.
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncState::Bootstrapping)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::SignedOut => "signed-out",
            SyncState::Bootstrapping => "bootstrapping",
            SyncState::Live => "live",
        };
        f.write_str(name)
    }
}

/// A push that failed and has not been retried successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    /// Entity that failed to reach the remote store.
    pub id: EntityId,
    /// Kind of the entity.
    pub kind: EntityKind,
    /// Error message from the remote store.
    pub error: String,
    /// True if the remote store was unreachable rather than refusing the
    /// write. The local copy of such an entity is kept until a retry lands.
    pub retryable: bool,
}

/// Observable push status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Time of the last successful push.
    pub last_sync_time: Option<Timestamp>,
    /// Number of pushes that have started but not settled.
    pub pending_count: usize,
    /// Pushes that failed, oldest first.
    pub failed_items: Vec<FailedItem>,
}

impl SyncStatus {
    /// Returns true if nothing is in flight and nothing has failed.
    pub fn is_clean(&self) -> bool {
        self.pending_count == 0 && self.failed_items.is_empty()
    }

    /// Returns the failure recorded for an entity, if any.
    pub fn failure(&self, kind: EntityKind, id: &EntityId) -> Option<&FailedItem> {
        self.failed_items
            .iter()
            .find(|item| item.kind == kind && &item.id == id)
    }
}

/// Mutates [`SyncStatus`] on behalf of the engine.
#[derive(Debug)]
pub(crate) struct StatusTracker {
    status: RwLock<SyncStatus>,
    max_failed_items: usize,
}

impl StatusTracker {
    pub(crate) fn new(max_failed_items: usize) -> Self {
        Self {
            status: RwLock::new(SyncStatus::default()),
            max_failed_items,
        }
    }

    pub(crate) fn snapshot(&self) -> SyncStatus {
        self.status.read().clone()
    }

    pub(crate) fn push_started(&self) {
        self.status.write().pending_count += 1;
    }

    pub(crate) fn push_succeeded(&self, kind: EntityKind, id: &EntityId) {
        let mut status = self.status.write();
        status.last_sync_time = Some(Timestamp::now());
        status.pending_count = status.pending_count.saturating_sub(1);
        status
            .failed_items
            .retain(|item| !(item.kind == kind && &item.id == id));
    }

    /// IDs of `kind` whose last push failed transiently.
    pub(crate) fn held_ids(&self, kind: EntityKind) -> HashSet<EntityId> {
        self.status
            .read()
            .failed_items
            .iter()
            .filter(|item| item.kind == kind && item.retryable)
            .map(|item| item.id.clone())
            .collect()
    }

    pub(crate) fn push_failed(
        &self,
        kind: EntityKind,
        id: &EntityId,
        error: String,
        retryable: bool,
    ) {
        let mut status = self.status.write();
        status.pending_count = status.pending_count.saturating_sub(1);
        status
            .failed_items
            .retain(|item| !(item.kind == kind && &item.id == id));
        status.failed_items.push(FailedItem {
            id: id.clone(),
            kind,
            error,
            retryable,
        });
        let overflow = status
            .failed_items
            .len()
            .saturating_sub(self.max_failed_items);
        if overflow > 0 {
            status.failed_items.drain(..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(SyncState::Bootstrapping.is_syncing());
        assert!(!SyncState::Live.is_syncing());
        assert_eq!(SyncState::SignedOut.to_string(), "signed-out");
    }

    #[test]
    fn success_clears_failure() {
        let tracker = StatusTracker::new(10);
        let id = EntityId::from("t1");

        tracker.push_started();
        tracker.push_failed(EntityKind::Todo, &id, "offline".into(), true);
        let status = tracker.snapshot();
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.failure(EntityKind::Todo, &id).unwrap().error, "offline");
        assert!(status.last_sync_time.is_none());

        tracker.push_started();
        assert_eq!(tracker.snapshot().pending_count, 1);
        tracker.push_succeeded(EntityKind::Todo, &id);
        let status = tracker.snapshot();
        assert!(status.is_clean());
        assert!(status.last_sync_time.is_some());
    }

    #[test]
    fn repeated_failures_replace_entry() {
        let tracker = StatusTracker::new(10);
        let id = EntityId::from("t1");
        for error in ["a", "b"] {
            tracker.push_started();
            tracker.push_failed(EntityKind::Todo, &id, error.into(), true);
        }
        let status = tracker.snapshot();
        assert_eq!(status.failed_items.len(), 1);
        assert_eq!(status.failed_items[0].error, "b");
    }

    #[test]
    fn failed_items_are_capped() {
        let tracker = StatusTracker::new(3);
        for i in 0..5 {
            tracker.push_started();
            tracker.push_failed(
                EntityKind::Tag,
                &EntityId::from(format!("g{i}")),
                "x".into(),
                false,
            );
        }
        let ids: Vec<_> = tracker
            .snapshot()
            .failed_items
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(
            ids,
            vec![EntityId::from("g2"), EntityId::from("g3"), EntityId::from("g4")]
        );
    }

    #[test]
    fn only_transient_failures_are_held() {
        let tracker = StatusTracker::new(10);
        for (id, retryable) in [("t1", true), ("t2", false)] {
            tracker.push_started();
            tracker.push_failed(EntityKind::Todo, &EntityId::from(id), "x".into(), retryable);
        }
        let held = tracker.held_ids(EntityKind::Todo);
        assert_eq!(held.len(), 1);
        assert!(held.contains(&EntityId::from("t1")));
        assert!(tracker.held_ids(EntityKind::Tag).is_empty());

        tracker.push_started();
        tracker.push_succeeded(EntityKind::Todo, &EntityId::from("t1"));
        assert!(tracker.held_ids(EntityKind::Todo).is_empty());
    }
}
