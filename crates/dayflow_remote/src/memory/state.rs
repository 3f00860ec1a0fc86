//! Shared backend state and snapshot fan-out.

use crate::config::SessionReadPolicy;
use crate::error::RemoteError;
use crate::subscription::{Snapshot, SnapshotSender};
use dayflow_core::{DeviceId, Entity, EntityId, EntityKind, SessionRecord, UserId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// A session record together with the credential that wrote it.
#[derive(Debug, Clone)]
pub(crate) struct StoredSession {
    pub(crate) record: SessionRecord,
    pub(crate) owner: DeviceId,
}

#[derive(Debug)]
struct CollectionWatcher {
    user: UserId,
    kind: EntityKind,
    device: DeviceId,
    tx: SnapshotSender<Vec<Entity>>,
}

#[derive(Debug)]
struct SessionWatcher {
    user: UserId,
    device: DeviceId,
    tx: SnapshotSender<Option<SessionRecord>>,
}

/// Everything the backend stores, guarded by one lock.
#[derive(Debug, Default)]
pub(crate) struct State {
    collections: HashMap<(UserId, EntityKind), BTreeMap<EntityId, Entity>>,
    sessions: HashMap<UserId, StoredSession>,
    offline: HashSet<DeviceId>,
    collection_watchers: Vec<CollectionWatcher>,
    session_watchers: Vec<SessionWatcher>,
}

impl State {
    pub(crate) fn is_offline(&self, device: &DeviceId) -> bool {
        self.offline.contains(device)
    }

    pub(crate) fn set_offline(&mut self, device: &DeviceId, offline: bool) -> bool {
        if offline {
            self.offline.insert(device.clone())
        } else {
            self.offline.remove(device)
        }
    }

    pub(crate) fn documents(
        &mut self,
        user: &UserId,
        kind: EntityKind,
    ) -> &mut BTreeMap<EntityId, Entity> {
        self.collections.entry((user.clone(), kind)).or_default()
    }

    pub(crate) fn snapshot(&self, user: &UserId, kind: EntityKind) -> Vec<Entity> {
        let mut all: Vec<Entity> = self
            .collections
            .get(&(user.clone(), kind))
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub(crate) fn session(&self, user: &UserId) -> Option<&StoredSession> {
        self.sessions.get(user)
    }

    pub(crate) fn session_mut(&mut self, user: &UserId) -> Option<&mut StoredSession> {
        self.sessions.get_mut(user)
    }

    pub(crate) fn put_session(&mut self, user: &UserId, stored: StoredSession) {
        self.sessions.insert(user.clone(), stored);
    }

    pub(crate) fn remove_session(&mut self, user: &UserId) -> Option<StoredSession> {
        self.sessions.remove(user)
    }

    /// What `device` is allowed to see of the user's session record.
    pub(crate) fn session_view(
        &self,
        user: &UserId,
        device: &DeviceId,
        policy: SessionReadPolicy,
    ) -> Snapshot<Option<SessionRecord>> {
        match self.sessions.get(user) {
            None => Ok(None),
            Some(stored) if policy == SessionReadPolicy::OwnerOnly && &stored.owner != device => {
                Err(RemoteError::PermissionDenied(format!("sessions/{user}")))
            }
            Some(stored) => Ok(Some(stored.record.clone())),
        }
    }

    pub(crate) fn watch_collection(
        &mut self,
        user: &UserId,
        kind: EntityKind,
        device: &DeviceId,
        tx: SnapshotSender<Vec<Entity>>,
        delay: Duration,
    ) {
        let first = if self.is_offline(device) {
            Err(offline_error(device))
        } else {
            Ok(self.snapshot(user, kind))
        };
        tx.send_after(delay, first);
        self.collection_watchers.push(CollectionWatcher {
            user: user.clone(),
            kind,
            device: device.clone(),
            tx,
        });
    }

    pub(crate) fn watch_session(
        &mut self,
        user: &UserId,
        device: &DeviceId,
        tx: SnapshotSender<Option<SessionRecord>>,
        delay: Duration,
        policy: SessionReadPolicy,
    ) {
        let first = if self.is_offline(device) {
            Err(offline_error(device))
        } else {
            self.session_view(user, device, policy)
        };
        tx.send_after(delay, first);
        self.session_watchers.push(SessionWatcher {
            user: user.clone(),
            device: device.clone(),
            tx,
        });
    }

    /// Pushes the collection's current contents to every online watcher.
    pub(crate) fn notify_collection(&mut self, user: &UserId, kind: EntityKind, delay: Duration) {
        let snapshot = self.snapshot(user, kind);
        let offline = &self.offline;
        self.collection_watchers.retain(|w| {
            if &w.user != user || w.kind != kind || offline.contains(&w.device) {
                return !w.tx.is_closed();
            }
            w.tx.send_after(delay, Ok(snapshot.clone()))
        });
    }

    /// Pushes the session record to every online watcher, filtered per reader.
    pub(crate) fn notify_session(
        &mut self,
        user: &UserId,
        delay: Duration,
        policy: SessionReadPolicy,
    ) {
        let views: Vec<_> = self
            .session_watchers
            .iter()
            .map(|w| self.session_view(&w.user, &w.device, policy))
            .collect();
        let offline = &self.offline;
        let mut views = views.into_iter();
        self.session_watchers.retain(|w| {
            let view = views.next().unwrap_or(Ok(None));
            if &w.user != user || offline.contains(&w.device) {
                return !w.tx.is_closed();
            }
            w.tx.send_after(delay, view)
        });
    }

    /// Tells every watcher of `device` that the connection dropped.
    pub(crate) fn notify_disconnect(&mut self, device: &DeviceId, delay: Duration) {
        let err = offline_error(device);
        self.collection_watchers.retain(|w| {
            if &w.device != device {
                return !w.tx.is_closed();
            }
            w.tx.send_after(delay, Err(err.clone()))
        });
        self.session_watchers.retain(|w| {
            if &w.device != device {
                return !w.tx.is_closed();
            }
            w.tx.send_after(delay, Err(err.clone()))
        });
    }

    /// Re-delivers current state to every watcher of `device`.
    pub(crate) fn notify_reconnect(
        &mut self,
        device: &DeviceId,
        delay: Duration,
        policy: SessionReadPolicy,
    ) {
        let collections: Vec<_> = self
            .collection_watchers
            .iter()
            .map(|w| self.snapshot(&w.user, w.kind))
            .collect();
        let mut collections = collections.into_iter();
        self.collection_watchers.retain(|w| {
            let snapshot = collections.next().unwrap_or_default();
            if &w.device != device {
                return !w.tx.is_closed();
            }
            w.tx.send_after(delay, Ok(snapshot))
        });

        let sessions: Vec<_> = self
            .session_watchers
            .iter()
            .map(|w| self.session_view(&w.user, &w.device, policy))
            .collect();
        let mut sessions = sessions.into_iter();
        self.session_watchers.retain(|w| {
            let view = sessions.next().unwrap_or(Ok(None));
            if &w.device != device {
                return !w.tx.is_closed();
            }
            w.tx.send_after(delay, view)
        });
    }

    pub(crate) fn watcher_count(&mut self) -> usize {
        self.collection_watchers.retain(|w| !w.tx.is_closed());
        self.session_watchers.retain(|w| !w.tx.is_closed());
        self.collection_watchers.len() + self.session_watchers.len()
    }
}

pub(crate) fn offline_error(device: &DeviceId) -> RemoteError {
    RemoteError::Unavailable(format!("device {device} is offline"))
}
