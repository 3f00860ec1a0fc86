//! Remote store contracts consumed by the sync engine.

use crate::error::RemoteResult;
use crate::subscription::SnapshotReceiver;
use async_trait::async_trait;
use dayflow_core::{Entity, EntityId, EntityKind, SessionRecord, UserId};

/// One remote collection of entities, scoped per user.
///
/// The remote copy is the durable source of truth. Every write is later
/// reflected in a full snapshot pushed to the user's subscribers,
/// including the device that made the write.
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    /// Returns the entity kind held by this collection.
    fn kind(&self) -> EntityKind;

    /// Returns every entity belonging to `user`.
    async fn get_all_by_user(&self, user: &UserId) -> RemoteResult<Vec<Entity>>;

    /// Creates a new document.
    ///
    /// Fails with `InvalidRequest` if a document with the same ID exists.
    async fn create(&self, user: &UserId, entity: &Entity) -> RemoteResult<()>;

    /// Writes the full document, creating it if it does not exist.
    async fn update(&self, user: &UserId, entity: &Entity) -> RemoteResult<()>;

    /// Deletes a document. Deleting a missing document succeeds.
    async fn delete(&self, user: &UserId, id: &EntityId) -> RemoteResult<()>;

    /// Opens a push subscription on the user's collection.
    ///
    /// The current contents are delivered first, then one snapshot per
    /// change. Transport problems arrive as error events; the
    /// subscription stays open after them.
    fn subscribe(&self, user: &UserId) -> SnapshotReceiver<Vec<Entity>>;
}

/// The per-user active-session document.
///
/// Access rules are enforced by the store against the calling device's
/// credential: anyone signed in as the user may overwrite the record, but
/// only the device that wrote it may touch or delete it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Overwrites the user's session record.
    ///
    /// The store stamps both timestamps and returns the stored record.
    async fn write_session(
        &self,
        user: &UserId,
        record: SessionRecord,
    ) -> RemoteResult<SessionRecord>;

    /// Refreshes `lastActive` on the user's session record.
    async fn touch_session(&self, user: &UserId) -> RemoteResult<()>;

    /// Deletes the user's session record.
    async fn delete_session(&self, user: &UserId) -> RemoteResult<()>;

    /// Reads the user's session record.
    async fn get_session(&self, user: &UserId) -> RemoteResult<Option<SessionRecord>>;

    /// Opens a push subscription on the user's session record.
    ///
    /// The current record (or `None`) is delivered first.
    fn subscribe_session(&self, user: &UserId) -> SnapshotReceiver<Option<SessionRecord>>;
}
