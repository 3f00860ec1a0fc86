//! Dispatch table from entity kind to its store pair.

use crate::error::{SyncError, SyncResult};
use dayflow_core::EntityKind;
use dayflow_remote::RemoteCollection;
use dayflow_store::LocalStore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The local store and remote collection serving one kind.
pub struct KindBinding {
    /// Local persistent collection.
    pub local: Arc<dyn LocalStore>,
    /// Remote source of truth.
    pub remote: Arc<dyn RemoteCollection>,
    /// Serializes local writes against snapshot resyncs.
    pub(crate) gate: Mutex<()>,
}

impl fmt::Debug for KindBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindBinding")
            .field("kind", &self.local.kind())
            .finish_non_exhaustive()
    }
}

/// Kind-keyed table of store pairs.
///
/// # Example
///
/// ```rust
/// use dayflow_core::{DeviceId, EntityKind};
/// use dayflow_remote::MemoryRemote;
/// use dayflow_store::MemoryStore;
/// use dayflow_sync_engine::KindTable;
/// use std::sync::Arc;
///
/// let remote = MemoryRemote::default().connect(DeviceId::from("phone"));
/// let mut table = KindTable::new();
/// table
///     .insert(
///         Arc::new(MemoryStore::new(EntityKind::Todo)),
///         Arc::new(remote.collection(EntityKind::Todo)),
///     )
///     .unwrap();
/// assert_eq!(table.kinds(), vec![EntityKind::Todo]);
/// ```
#[derive(Debug, Default)]
pub struct KindTable {
    bindings: BTreeMap<EntityKind, Arc<KindBinding>>,
}

impl KindTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the store pair for a kind, replacing any previous pair.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::KindMismatch`] if the two stores serve
    /// different kinds.
    pub fn insert(
        &mut self,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteCollection>,
    ) -> SyncResult<()> {
        let kind = local.kind();
        if remote.kind() != kind {
            return Err(SyncError::KindMismatch {
                local: kind,
                remote: remote.kind(),
            });
        }
        self.bindings.insert(
            kind,
            Arc::new(KindBinding {
                local,
                remote,
                gate: Mutex::new(()),
            }),
        );
        Ok(())
    }

    /// Returns the pair for a kind.
    pub fn get(&self, kind: EntityKind) -> SyncResult<Arc<KindBinding>> {
        self.bindings
            .get(&kind)
            .cloned()
            .ok_or(SyncError::UnknownKind(kind))
    }

    /// Returns the registered kinds in bootstrap order.
    pub fn kinds(&self) -> Vec<EntityKind> {
        self.bindings.keys().copied().collect()
    }

    /// Returns the number of registered kinds.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true if no kind is registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dayflow_core::DeviceId;
    use dayflow_remote::MemoryRemote;
    use dayflow_store::MemoryStore;

    #[test]
    fn mismatched_pair_is_rejected() {
        let remote = MemoryRemote::default().connect(DeviceId::from("a"));
        let mut table = KindTable::new();
        let result = table.insert(
            Arc::new(MemoryStore::new(EntityKind::Todo)),
            Arc::new(remote.collection(EntityKind::Tag)),
        );
        assert!(matches!(result, Err(SyncError::KindMismatch { .. })));
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_kind_lookup_fails() {
        let table = KindTable::new();
        assert!(matches!(
            table.get(EntityKind::Record),
            Err(SyncError::UnknownKind(EntityKind::Record))
        ));
    }

    #[test]
    fn kinds_follow_bootstrap_order() {
        let remote = MemoryRemote::default().connect(DeviceId::from("a"));
        let mut table = KindTable::new();
        for kind in [EntityKind::Tag, EntityKind::Todo, EntityKind::Record] {
            table
                .insert(
                    Arc::new(MemoryStore::new(kind)),
                    Arc::new(remote.collection(kind)),
                )
                .unwrap();
        }
        assert_eq!(
            table.kinds(),
            vec![EntityKind::Todo, EntityKind::Record, EntityKind::Tag]
        );
    }
}
