//! In-process reference backend.
//!
//! [`MemoryRemote`] stands in for the hosted document store. Devices
//! connect with their own [`DeviceId`] credential and get a
//! [`RemoteClient`], which implements [`SessionStore`] directly and hands
//! out one [`MemoryCollection`] per entity kind.
//!
//! The backend enforces the session access rules, stamps server time on
//! session records, pushes snapshots to subscribers after every write, and
//! can take a single device offline.

mod collection;
mod state;

pub use collection::MemoryCollection;

use crate::config::MemoryRemoteConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::SessionStore;
use crate::subscription::{snapshot_channel, SnapshotReceiver};
use async_trait::async_trait;
use dayflow_core::{DeviceId, Entity, EntityKind, SessionRecord, Timestamp, UserId};
use parking_lot::Mutex;
use state::{offline_error, State, StoredSession};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

struct Shared {
    config: MemoryRemoteConfig,
    state: Mutex<State>,
}

/// The reference remote store, shared by any number of devices.
///
/// # Example
///
/// ```rust
/// use dayflow_core::{DeviceId, EntityKind};
/// use dayflow_remote::{MemoryRemote, MemoryRemoteConfig};
///
/// let remote = MemoryRemote::new(MemoryRemoteConfig::default());
/// let phone = remote.connect(DeviceId::from("phone"));
/// let todos = phone.collection(EntityKind::Todo);
/// # let _ = todos;
/// ```
#[derive(Clone)]
pub struct MemoryRemote {
    shared: Arc<Shared>,
}

impl MemoryRemote {
    /// Creates an empty backend.
    pub fn new(config: MemoryRemoteConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Opens a connection authenticated as `device`.
    pub fn connect(&self, device: DeviceId) -> RemoteClient {
        debug!(device = %device, "device connected");
        RemoteClient {
            shared: Arc::clone(&self.shared),
            device,
        }
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &MemoryRemoteConfig {
        &self.shared.config
    }

    /// Returns the stored entities of one user and kind.
    pub fn entities(&self, user: &UserId, kind: EntityKind) -> Vec<Entity> {
        self.shared.state.lock().snapshot(user, kind)
    }

    /// Returns the user's session record, bypassing access rules.
    pub fn session(&self, user: &UserId) -> Option<SessionRecord> {
        self.shared
            .state
            .lock()
            .session(user)
            .map(|s| s.record.clone())
    }

    /// Returns the credential that wrote the user's session record.
    pub fn session_owner(&self, user: &UserId) -> Option<DeviceId> {
        self.shared
            .state
            .lock()
            .session(user)
            .map(|s| s.owner.clone())
    }

    /// Returns the number of open subscriptions across all devices.
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().watcher_count()
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new(MemoryRemoteConfig::default())
    }
}

impl fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRemote")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

/// One device's connection to a [`MemoryRemote`].
#[derive(Clone)]
pub struct RemoteClient {
    shared: Arc<Shared>,
    device: DeviceId,
}

impl RemoteClient {
    /// Returns the credential this connection is authenticated with.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Returns the remote collection for `kind`.
    pub fn collection(&self, kind: EntityKind) -> MemoryCollection {
        MemoryCollection::new(self.clone(), kind)
    }

    /// Cuts or restores this device's connectivity.
    ///
    /// Going offline sends an `Unavailable` error to the device's
    /// subscriptions and fails its requests. Coming back online
    /// re-delivers the current state to every subscription.
    pub fn set_offline(&self, offline: bool) {
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        if !state.set_offline(&self.device, offline) {
            return;
        }
        if offline {
            info!(device = %self.device, "device offline");
            state.notify_disconnect(&self.device, config.notify_delay);
        } else {
            info!(device = %self.device, "device online");
            state.notify_reconnect(&self.device, config.notify_delay, config.session_read_policy);
        }
    }

    /// Returns true while the device is offline.
    pub fn is_offline(&self) -> bool {
        self.shared.state.lock().is_offline(&self.device)
    }

    /// Simulates request latency and rejects requests from offline devices.
    async fn round_trip(&self) -> RemoteResult<()> {
        let latency = self.shared.config.write_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.is_offline() {
            return Err(offline_error(&self.device));
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionStore for RemoteClient {
    async fn write_session(
        &self,
        user: &UserId,
        record: SessionRecord,
    ) -> RemoteResult<SessionRecord> {
        self.round_trip().await?;
        let config = &self.shared.config;
        let now = Timestamp::now();
        let record = SessionRecord {
            created_at: now,
            last_active: now,
            ..record
        };

        let mut state = self.shared.state.lock();
        state.put_session(
            user,
            StoredSession {
                record: record.clone(),
                owner: self.device.clone(),
            },
        );
        debug!(user = %user, session = %record.session_id, device = %self.device, "session written");
        state.notify_session(user, config.notify_delay, config.session_read_policy);
        Ok(record)
    }

    async fn touch_session(&self, user: &UserId) -> RemoteResult<()> {
        self.round_trip().await?;
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        let stored = state
            .session_mut(user)
            .ok_or_else(|| RemoteError::NotFound(format!("sessions/{user}")))?;
        if stored.owner != self.device {
            return Err(RemoteError::PermissionDenied(format!("sessions/{user}")));
        }
        stored.record.last_active = Timestamp::now().max(stored.record.last_active);
        state.notify_session(user, config.notify_delay, config.session_read_policy);
        Ok(())
    }

    async fn delete_session(&self, user: &UserId) -> RemoteResult<()> {
        self.round_trip().await?;
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        match state.session(user) {
            None => return Ok(()),
            Some(stored) if stored.owner != self.device => {
                return Err(RemoteError::PermissionDenied(format!("sessions/{user}")));
            }
            Some(_) => {}
        }
        state.remove_session(user);
        debug!(user = %user, device = %self.device, "session deleted");
        state.notify_session(user, config.notify_delay, config.session_read_policy);
        Ok(())
    }

    async fn get_session(&self, user: &UserId) -> RemoteResult<Option<SessionRecord>> {
        self.round_trip().await?;
        let policy = self.shared.config.session_read_policy;
        self.shared
            .state
            .lock()
            .session_view(user, &self.device, policy)
    }

    fn subscribe_session(&self, user: &UserId) -> SnapshotReceiver<Option<SessionRecord>> {
        let (tx, rx) = snapshot_channel();
        let config = &self.shared.config;
        self.shared.state.lock().watch_session(
            user,
            &self.device,
            tx,
            config.notify_delay,
            config.session_read_policy,
        );
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionReadPolicy;
    use crate::remote::RemoteCollection;
    use dayflow_core::{EntityDraft, SessionId};
    use std::time::Duration;

    fn user() -> UserId {
        UserId::from("u1")
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let remote = MemoryRemote::default();
        let todos = remote.connect(DeviceId::from("a")).collection(EntityKind::Todo);
        let entity = EntityDraft::new().with_id("t1").field("title", "x").into_entity();

        todos.create(&user(), &entity).await.unwrap();
        assert_eq!(todos.get_all_by_user(&user()).await.unwrap(), vec![entity.clone()]);

        let dup = todos.create(&user(), &entity).await;
        assert!(matches!(dup, Err(RemoteError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn collections_are_scoped_per_user() {
        let remote = MemoryRemote::default();
        let todos = remote.connect(DeviceId::from("a")).collection(EntityKind::Todo);
        let entity = EntityDraft::new().with_id("t1").into_entity();
        todos.create(&user(), &entity).await.unwrap();

        let other = todos.get_all_by_user(&UserId::from("u2")).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn update_upserts_and_delete_is_idempotent() {
        let remote = MemoryRemote::default();
        let tags = remote.connect(DeviceId::from("a")).collection(EntityKind::Tag);
        let tag = EntityDraft::new().with_id("g1").field("name", "work").into_entity();

        tags.update(&user(), &tag).await.unwrap();
        assert_eq!(remote.entities(&user(), EntityKind::Tag).len(), 1);

        tags.delete(&user(), &tag.id).await.unwrap();
        tags.delete(&user(), &tag.id).await.unwrap();
        assert!(remote.entities(&user(), EntityKind::Tag).is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_initial_and_changed_snapshots() {
        let remote = MemoryRemote::default();
        let a = remote.connect(DeviceId::from("a")).collection(EntityKind::Todo);
        let b = remote.connect(DeviceId::from("b")).collection(EntityKind::Todo);

        let mut rx = b.subscribe(&user());
        assert_eq!(rx.recv().await, Some(Ok(vec![])));

        let entity = EntityDraft::new().with_id("t1").into_entity();
        a.create(&user(), &entity).await.unwrap();
        assert_eq!(rx.recv().await, Some(Ok(vec![entity])));
    }

    #[tokio::test]
    async fn offline_device_is_rejected_then_resynced() {
        let remote = MemoryRemote::default();
        let client = remote.connect(DeviceId::from("a"));
        let todos = client.collection(EntityKind::Todo);
        let mut rx = todos.subscribe(&user());
        assert!(matches!(rx.recv().await, Some(Ok(_))));

        client.set_offline(true);
        assert!(client.is_offline());
        assert!(matches!(rx.recv().await, Some(Err(RemoteError::Unavailable(_)))));
        let entity = EntityDraft::new().with_id("t1").into_entity();
        let err = todos.create(&user(), &entity).await.unwrap_err();
        assert!(err.is_retryable());

        client.set_offline(false);
        assert_eq!(rx.recv().await, Some(Ok(vec![])));
        todos.create(&user(), &entity).await.unwrap();
        assert_eq!(rx.recv().await, Some(Ok(vec![entity])));
    }

    #[tokio::test]
    async fn session_write_stamps_server_time() {
        let remote = MemoryRemote::default();
        let client = remote.connect(DeviceId::from("a"));
        let mut record = SessionRecord::new(SessionId::new("s1"));
        record.created_at = Timestamp::from_millis(1);

        let stored = client.write_session(&user(), record).await.unwrap();
        assert!(stored.created_at > Timestamp::from_millis(1));
        assert_eq!(remote.session(&user()), Some(stored));
        assert_eq!(remote.session_owner(&user()), Some(DeviceId::from("a")));
    }

    #[tokio::test]
    async fn superseded_device_cannot_touch_or_delete() {
        let remote = MemoryRemote::default();
        let a = remote.connect(DeviceId::from("a"));
        let b = remote.connect(DeviceId::from("b"));

        a.write_session(&user(), SessionRecord::new(SessionId::new("s-a")))
            .await
            .unwrap();
        b.write_session(&user(), SessionRecord::new(SessionId::new("s-b")))
            .await
            .unwrap();

        assert!(a.touch_session(&user()).await.unwrap_err().is_permission_denied());
        assert!(a.delete_session(&user()).await.unwrap_err().is_permission_denied());
        assert!(a.get_session(&user()).await.unwrap_err().is_permission_denied());

        b.touch_session(&user()).await.unwrap();
        b.delete_session(&user()).await.unwrap();
        assert_eq!(remote.session(&user()), None);
        // Nothing left to protect once the record is gone.
        assert_eq!(a.get_session(&user()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn touch_without_record_is_not_found() {
        let remote = MemoryRemote::default();
        let a = remote.connect(DeviceId::from("a"));
        let err = a.touch_session(&user()).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn takeover_is_pushed_per_read_policy() {
        for policy in [SessionReadPolicy::OwnerOnly, SessionReadPolicy::Open] {
            let remote =
                MemoryRemote::new(MemoryRemoteConfig::new().with_session_read_policy(policy));
            let a = remote.connect(DeviceId::from("a"));
            let b = remote.connect(DeviceId::from("b"));

            a.write_session(&user(), SessionRecord::new(SessionId::new("s-a")))
                .await
                .unwrap();
            let mut rx = a.subscribe_session(&user());
            let first = rx.recv().await.unwrap().unwrap().unwrap();
            assert_eq!(first.session_id, SessionId::new("s-a"));

            b.write_session(&user(), SessionRecord::new(SessionId::new("s-b")))
                .await
                .unwrap();
            match (policy, rx.recv().await.unwrap()) {
                (SessionReadPolicy::OwnerOnly, Err(err)) => assert!(err.is_permission_denied()),
                (SessionReadPolicy::Open, Ok(Some(record))) => {
                    assert_eq!(record.session_id, SessionId::new("s-b"));
                }
                (policy, other) => panic!("unexpected {other:?} under {policy:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn latency_and_notify_delay_apply() {
        let config = MemoryRemoteConfig::new()
            .with_write_latency(Duration::from_millis(30))
            .with_notify_delay(Duration::from_millis(100));
        let remote = MemoryRemote::new(config);
        let todos = remote.connect(DeviceId::from("a")).collection(EntityKind::Todo);
        let mut rx = todos.subscribe(&user());

        let start = tokio::time::Instant::now();
        todos
            .create(&user(), &EntityDraft::new().with_id("t1").into_entity())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));

        // initial snapshot, then the create
        assert_eq!(rx.recv().await.unwrap().unwrap().len(), 0);
        assert_eq!(rx.recv().await.unwrap().unwrap().len(), 1);
        assert!(start.elapsed() >= Duration::from_millis(130));
    }

    #[tokio::test]
    async fn dropped_receivers_stop_counting() {
        let remote = MemoryRemote::default();
        let client = remote.connect(DeviceId::from("a"));
        let rx1 = client.collection(EntityKind::Todo).subscribe(&user());
        let rx2 = client.subscribe_session(&user());
        assert_eq!(remote.subscriber_count(), 2);
        drop(rx1);
        drop(rx2);
        assert_eq!(remote.subscriber_count(), 0);
    }
}
