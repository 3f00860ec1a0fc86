//! Mutations made while signed out.

use dayflow_core::{EntityId, EntityKind};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

/// IDs touched while no identity was present, in first-touch order.
///
/// At the next bootstrap these IDs keep their local state instead of being
/// replaced by the remote collection, and are then pushed. The journal
/// lives in memory only.
#[derive(Debug, Default)]
pub struct OfflineJournal {
    entries: Mutex<BTreeMap<EntityKind, Vec<EntityId>>>,
}

impl OfflineJournal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a local mutation of `id`.
    pub fn record(&self, kind: EntityKind, id: EntityId) {
        let mut entries = self.entries.lock();
        let ids = entries.entry(kind).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Returns the journaled IDs of one kind without removing them.
    pub fn ids(&self, kind: EntityKind) -> HashSet<EntityId> {
        self.entries
            .lock()
            .get(&kind)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes and returns the journaled IDs of one kind.
    pub fn take(&self, kind: EntityKind) -> Vec<EntityId> {
        self.entries.lock().remove(&kind).unwrap_or_default()
    }

    /// Returns the number of journaled IDs.
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    /// Returns true if nothing is journaled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_deduplicates_and_keeps_order() {
        let journal = OfflineJournal::new();
        journal.record(EntityKind::Todo, EntityId::from("b"));
        journal.record(EntityKind::Todo, EntityId::from("a"));
        journal.record(EntityKind::Todo, EntityId::from("b"));
        journal.record(EntityKind::Tag, EntityId::from("g"));

        assert_eq!(journal.len(), 3);
        assert_eq!(
            journal.take(EntityKind::Todo),
            vec![EntityId::from("b"), EntityId::from("a")]
        );
        assert!(journal.ids(EntityKind::Todo).is_empty());
        assert!(journal.ids(EntityKind::Tag).contains(&EntityId::from("g")));
    }
}
