//! Local store trait definition.

use crate::error::StoreResult;
use async_trait::async_trait;
use dayflow_core::{Entity, EntityDraft, EntityId, EntityKind, Fields};

/// A local persistent collection for one entity kind.
///
/// # Invariants
///
/// - `add` assigns an ID when the draft has none and fails if the ID is taken
/// - `update` fails with [`crate::StoreError::NotFound`] for unknown IDs
/// - `delete` of an unknown ID is a no-op
/// - `sync` is an idempotent upsert: syncing the same entity twice leaves
///   the collection as syncing it once
/// - `replace_all` is atomic
/// - `get_all` returns entities ordered by creation time, then ID
///
/// Every method is a suspension point; implementations must be `Send + Sync`
/// so one store can be shared between the engine and its background tasks.
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// The kind of entity this collection holds.
    fn kind(&self) -> EntityKind;

    /// Returns every entity in the collection.
    async fn get_all(&self) -> StoreResult<Vec<Entity>>;

    /// Returns one entity by ID.
    async fn get(&self, id: &EntityId) -> StoreResult<Option<Entity>>;

    /// Inserts a new entity, generating an ID if the draft has none.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::AlreadyExists`] if the ID is taken.
    async fn add(&self, draft: EntityDraft) -> StoreResult<Entity>;

    /// Merges `patch` into an existing entity and returns the result.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] if no entity has this ID.
    async fn update(&self, id: &EntityId, patch: &Fields) -> StoreResult<Entity>;

    /// Removes an entity.
    async fn delete(&self, id: &EntityId) -> StoreResult<()>;

    /// Upserts an entity received from the remote store, verbatim.
    async fn sync(&self, entity: Entity) -> StoreResult<()>;

    /// Removes every entity.
    async fn clear(&self) -> StoreResult<()>;

    /// Replaces the whole collection with `entities` in one write.
    ///
    /// Either every entity is stored or the collection is left unchanged.
    async fn replace_all(&self, entities: Vec<Entity>) -> StoreResult<()>;

    /// Finds the entity whose natural key field equals `key`.
    ///
    /// Always `None` for kinds without a natural key.
    async fn find_by_key(&self, key: &str) -> StoreResult<Option<Entity>>;

    /// Returns true if an entity with natural key `key` exists.
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.find_by_key(key).await?.is_some())
    }
}
