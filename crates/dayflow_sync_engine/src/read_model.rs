//! The in-memory view the UI renders from.

use dayflow_core::{Entity, EntityKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::watch;

/// Per-kind lists mirrored from the local stores.
///
/// Every replacement bumps a revision number published on a watch
/// channel, so a UI layer can await changes instead of polling.
#[derive(Debug)]
pub struct ReadModel {
    views: RwLock<HashMap<EntityKind, Vec<Entity>>>,
    revision: watch::Sender<u64>,
}

impl ReadModel {
    /// Creates an empty read model at revision zero.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            views: RwLock::new(HashMap::new()),
            revision,
        }
    }

    /// Replaces the list for one kind.
    pub fn replace(&self, kind: EntityKind, entities: Vec<Entity>) {
        self.views.write().insert(kind, entities);
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Returns the list for one kind.
    pub fn get(&self, kind: EntityKind) -> Vec<Entity> {
        self.views.read().get(&kind).cloned().unwrap_or_default()
    }

    /// Returns all todos.
    pub fn todos(&self) -> Vec<Entity> {
        self.get(EntityKind::Todo)
    }

    /// Returns all routines.
    pub fn routines(&self) -> Vec<Entity> {
        self.get(EntityKind::Routine)
    }

    /// Returns all records.
    pub fn records(&self) -> Vec<Entity> {
        self.get(EntityKind::Record)
    }

    /// Returns all tags.
    pub fn tags(&self) -> Vec<Entity> {
        self.get(EntityKind::Tag)
    }

    /// Returns the current revision.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Returns a receiver notified on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

impl Default for ReadModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dayflow_core::EntityDraft;

    #[test]
    fn replace_and_read() {
        let model = ReadModel::new();
        assert!(model.todos().is_empty());

        let todo = EntityDraft::new().with_id("t1").into_entity();
        model.replace(EntityKind::Todo, vec![todo.clone()]);

        assert_eq!(model.todos(), vec![todo]);
        assert!(model.tags().is_empty());
        assert_eq!(model.revision(), 1);
    }

    #[tokio::test]
    async fn subscribers_see_revisions() {
        let model = ReadModel::new();
        let mut rx = model.subscribe();
        model.replace(EntityKind::Tag, Vec::new());
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
