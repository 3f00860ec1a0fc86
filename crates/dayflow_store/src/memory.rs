//! In-memory local store for testing.

use crate::collection::Collection;
use crate::error::{StoreError, StoreResult};
use crate::store::LocalStore;
use async_trait::async_trait;
use dayflow_core::{Entity, EntityDraft, EntityId, EntityKind, Fields};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory local store.
///
/// This store keeps its collection in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Anonymous sessions that don't need persistence
///
/// It can be switched into an unavailable mode in which every operation
/// fails, to exercise local-storage error paths.
///
/// # Example
///
/// ```rust
/// use dayflow_core::EntityKind;
/// use dayflow_store::{LocalStore, MemoryStore};
///
/// let store = MemoryStore::new(EntityKind::Todo);
/// assert_eq!(store.kind(), EntityKind::Todo);
/// assert!(store.is_empty());
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    collection: RwLock<Collection>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates a new empty store for one kind.
    #[must_use]
    pub fn new(kind: EntityKind) -> Self {
        Self {
            collection: RwLock::new(Collection::new(kind)),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Creates a store with pre-existing entities.
    #[must_use]
    pub fn with_entities(kind: EntityKind, entities: Vec<Entity>) -> Self {
        Self {
            collection: RwLock::new(Collection::from_entities(kind, entities)),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent operation fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns a copy of all entities without going through the async API.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Entity> {
        self.collection.read().all()
    }

    /// Returns the number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collection.read().len()
    }

    /// Returns true if the store holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!(
                "{} store is unavailable",
                self.kind()
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn kind(&self) -> EntityKind {
        self.collection.read().kind()
    }

    async fn get_all(&self) -> StoreResult<Vec<Entity>> {
        self.check_available()?;
        Ok(self.collection.read().all())
    }

    async fn get(&self, id: &EntityId) -> StoreResult<Option<Entity>> {
        self.check_available()?;
        Ok(self.collection.read().get(id))
    }

    async fn add(&self, draft: EntityDraft) -> StoreResult<Entity> {
        self.check_available()?;
        self.collection.write().add(draft)
    }

    async fn update(&self, id: &EntityId, patch: &Fields) -> StoreResult<Entity> {
        self.check_available()?;
        self.collection.write().update(id, patch)
    }

    async fn delete(&self, id: &EntityId) -> StoreResult<()> {
        self.check_available()?;
        self.collection.write().delete(id);
        Ok(())
    }

    async fn sync(&self, entity: Entity) -> StoreResult<()> {
        self.check_available()?;
        self.collection.write().sync(entity);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.check_available()?;
        self.collection.write().clear();
        Ok(())
    }

    async fn replace_all(&self, entities: Vec<Entity>) -> StoreResult<()> {
        self.check_available()?;
        self.collection.write().replace(entities);
        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> StoreResult<Option<Entity>> {
        self.check_available()?;
        Ok(self.collection.read().find_by_key(key))
    }
}
