//! Remote collections served by the reference backend.

use super::RemoteClient;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::RemoteCollection;
use crate::subscription::{snapshot_channel, SnapshotReceiver};
use async_trait::async_trait;
use dayflow_core::{Entity, EntityId, EntityKind, UserId};
use tracing::debug;

/// One entity collection as seen through a device's connection.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    client: RemoteClient,
    kind: EntityKind,
}

impl MemoryCollection {
    pub(crate) fn new(client: RemoteClient, kind: EntityKind) -> Self {
        Self { client, kind }
    }
}

#[async_trait]
impl RemoteCollection for MemoryCollection {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn get_all_by_user(&self, user: &UserId) -> RemoteResult<Vec<Entity>> {
        self.client.round_trip().await?;
        let state = self.client.shared.state.lock();
        Ok(state.snapshot(user, self.kind))
    }

    async fn create(&self, user: &UserId, entity: &Entity) -> RemoteResult<()> {
        self.client.round_trip().await?;
        let delay = self.client.shared.config.notify_delay;
        let mut state = self.client.shared.state.lock();
        let docs = state.documents(user, self.kind);
        if docs.contains_key(&entity.id) {
            return Err(RemoteError::InvalidRequest(format!(
                "{}/{} already exists",
                self.kind.collection_name(),
                entity.id
            )));
        }
        docs.insert(entity.id.clone(), entity.clone());
        debug!(kind = %self.kind, id = %entity.id, device = %self.client.device, "remote create");
        state.notify_collection(user, self.kind, delay);
        Ok(())
    }

    async fn update(&self, user: &UserId, entity: &Entity) -> RemoteResult<()> {
        self.client.round_trip().await?;
        let delay = self.client.shared.config.notify_delay;
        let mut state = self.client.shared.state.lock();
        state
            .documents(user, self.kind)
            .insert(entity.id.clone(), entity.clone());
        debug!(kind = %self.kind, id = %entity.id, device = %self.client.device, "remote update");
        state.notify_collection(user, self.kind, delay);
        Ok(())
    }

    async fn delete(&self, user: &UserId, id: &EntityId) -> RemoteResult<()> {
        self.client.round_trip().await?;
        let delay = self.client.shared.config.notify_delay;
        let mut state = self.client.shared.state.lock();
        if state.documents(user, self.kind).remove(id).is_some() {
            debug!(kind = %self.kind, id = %id, device = %self.client.device, "remote delete");
            state.notify_collection(user, self.kind, delay);
        }
        Ok(())
    }

    fn subscribe(&self, user: &UserId) -> SnapshotReceiver<Vec<Entity>> {
        let (tx, rx) = snapshot_channel();
        let delay = self.client.shared.config.notify_delay;
        self.client
            .shared
            .state
            .lock()
            .watch_collection(user, self.kind, &self.client.device, tx, delay);
        rx
    }
}
