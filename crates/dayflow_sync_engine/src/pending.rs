//! Tracking of entities this device is currently writing.

use dayflow_core::{EntityId, EntityKind};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

type PendingKey = (EntityKind, EntityId);

#[derive(Debug, Default)]
struct Inner {
    counts: HashMap<PendingKey, usize>,
    timers: HashMap<u64, JoinHandle<()>>,
    next_timer: u64,
}

/// The set of entity IDs with a write in flight on this device.
///
/// Membership is reference counted: every [`mark`](Self::mark) must be
/// matched by one release, and an ID stays pending until all overlapping
/// writes to it have been released. Releases after a successful push are
/// deferred by a grace interval on a cancellable timer task.
#[derive(Debug, Default)]
pub struct PendingChangeSet {
    inner: Mutex<Inner>,
}

impl PendingChangeSet {
    /// Creates an empty set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks an entity as being written.
    pub fn mark(&self, kind: EntityKind, id: &EntityId) {
        let mut inner = self.inner.lock();
        *inner.counts.entry((kind, id.clone())).or_insert(0) += 1;
        trace!(kind = %kind, id = %id, "marked pending");
    }

    /// Drops one mark for the entity.
    ///
    /// Returns true if the entity is no longer pending afterwards.
    pub fn release(&self, kind: EntityKind, id: &EntityId) -> bool {
        let mut inner = self.inner.lock();
        let key = (kind, id.clone());
        match inner.counts.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                inner.counts.remove(&key);
                trace!(kind = %kind, id = %id, "released pending");
                true
            }
            None => true,
        }
    }

    /// Drops one mark for the entity once `grace` has elapsed.
    ///
    /// `on_settled` runs if that release leaves the entity no longer
    /// pending. It never runs for a timer cancelled by [`clear`](Self::clear).
    ///
    /// Must be called from within a tokio runtime unless `grace` is zero.
    pub fn release_after<F>(
        self: &Arc<Self>,
        kind: EntityKind,
        id: EntityId,
        grace: Duration,
        on_settled: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        if grace.is_zero() {
            if self.release(kind, &id) {
                on_settled();
            }
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let mut inner = self.inner.lock();
        let timer_id = inner.next_timer;
        inner.next_timer += 1;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(set) = weak.upgrade() {
                set.inner.lock().timers.remove(&timer_id);
                if set.release(kind, &id) {
                    on_settled();
                }
            }
        });
        inner.timers.insert(timer_id, handle);
    }

    /// Returns true if the entity is pending.
    pub fn contains(&self, kind: EntityKind, id: &EntityId) -> bool {
        self.inner.lock().counts.contains_key(&(kind, id.clone()))
    }

    /// Returns the pending IDs of one kind.
    pub fn ids(&self, kind: EntityKind) -> HashSet<EntityId> {
        self.inner
            .lock()
            .counts
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Returns the number of pending entities across all kinds.
    pub fn len(&self) -> usize {
        self.inner.lock().counts.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of grace timers still running.
    pub fn timer_count(&self) -> usize {
        self.inner.lock().timers.len()
    }

    /// Cancels every grace timer and forgets all marks.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for (_, timer) in inner.timers.drain() {
            timer.abort();
        }
        inner.counts.clear();
    }
}
