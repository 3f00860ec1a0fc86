//! The local-first sync engine.
//!
//! For every registered kind the engine keeps the local store, the read
//! model and the remote collection consistent:
//!
//! 1. **Bootstrap** (identity becomes present): pull the remote collection,
//!    clear the local store, upsert every pulled entity, refresh the read
//!    model. All kinds finish before any subscription is installed.
//! 2. **Live**: each remote snapshot drives a clear and resync of the local
//!    store. Entities this device is still writing are left out of the
//!    resync and keep their local state.
//! 3. **Mutations**: mark pending, apply locally and refresh the read
//!    model, then push in the background. A successful push releases the
//!    pending mark after the grace interval; a failed one is recorded in
//!    the sync status and released at once. Entities whose push failed
//!    because the remote was unreachable keep their local state until a
//!    retry lands.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::journal::OfflineJournal;
use crate::kinds::{KindBinding, KindTable};
use crate::pending::PendingChangeSet;
use crate::push::{PushJob, PushLane, PushOp};
use crate::read_model::ReadModel;
use crate::status::{StatusTracker, SyncState, SyncStatus};
use dayflow_core::{Entity, EntityDraft, EntityId, EntityKind, Fields, UserId};
use dayflow_remote::{ActiveFlag, Subscription};
use dayflow_store::StoreResult;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Last snapshot delivered for a kind.
struct CachedSnapshot {
    generation: u64,
    /// Arrival order across all kinds.
    seq: u64,
    entities: Vec<Entity>,
}

struct EngineInner {
    config: SyncConfig,
    kinds: KindTable,
    pending: Arc<PendingChangeSet>,
    journal: OfflineJournal,
    status: StatusTracker,
    read_model: ReadModel,
    state: RwLock<SyncState>,
    identity: RwLock<Option<UserId>>,
    generation: AtomicU64,
    subscriptions: Mutex<HashMap<EntityKind, Subscription>>,
    snapshots: Mutex<HashMap<EntityKind, CachedSnapshot>>,
    snapshot_seq: AtomicU64,
    lane: PushLane,
}

impl EngineInner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn ensure_current(&self, generation: u64) -> SyncResult<()> {
        if self.is_current(generation) {
            Ok(())
        } else {
            Err(SyncError::Cancelled)
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Drops every subscription and in-flight mark; returns the new generation.
    fn reset(&self, user: Option<UserId>, state: SyncState) -> u64 {
        let generation = {
            let mut identity = self.identity.write();
            *identity = user;
            *self.state.write() = state;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        let cancelled: Vec<Subscription> = self
            .subscriptions
            .lock()
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();
        for subscription in &cancelled {
            subscription.cancel();
        }
        self.pending.clear();
        self.snapshots.lock().clear();
        generation
    }

    /// IDs of `kind` whose local state must survive a remote resync.
    fn protected_ids(&self, kind: EntityKind) -> HashSet<EntityId> {
        let mut ids = self.pending.ids(kind);
        ids.extend(self.status.held_ids(kind));
        ids
    }

    async fn refresh_kind(&self, binding: &KindBinding, kind: EntityKind) -> SyncResult<()> {
        let entities = binding.local.get_all().await?;
        self.read_model.replace(kind, entities);
        Ok(())
    }

    async fn bootstrap_kind(
        &self,
        user: &UserId,
        kind: EntityKind,
        generation: u64,
    ) -> SyncResult<()> {
        let binding = self.kinds.get(kind)?;
        let _gate = binding.gate.lock().await;
        self.ensure_current(generation)?;

        let remote = match binding.remote.get_all_by_user(user).await {
            Ok(entities) => entities,
            Err(err) => {
                self.ensure_current(generation)?;
                warn!(kind = %kind, error = %err, "bootstrap pull failed, keeping local data");
                return self.refresh_kind(&binding, kind).await;
            }
        };
        self.ensure_current(generation)?;

        // Offline writes, writes made during the bootstrap and unsent
        // retries keep their local state.
        let mut kept = self.journal.ids(kind);
        kept.extend(self.protected_ids(kind));
        let pulled = remote.len();
        let mut merged: Vec<Entity> = remote
            .into_iter()
            .filter(|entity| !kept.contains(&entity.id))
            .collect();
        for id in &kept {
            if let Some(entity) = binding.local.get(id).await? {
                merged.push(entity);
            }
        }

        binding.local.replace_all(merged).await?;
        self.refresh_kind(&binding, kind).await?;

        debug!(kind = %kind, pulled, kept_local = kept.len(), "kind bootstrapped");
        Ok(())
    }

    async fn apply_snapshot(
        &self,
        kind: EntityKind,
        generation: u64,
        remote: Vec<Entity>,
        flag: &ActiveFlag,
    ) -> SyncResult<()> {
        let binding = self.kinds.get(kind)?;
        let _gate = binding.gate.lock().await;
        if !flag.is_active() || !self.is_current(generation) {
            return Ok(());
        }
        let seq = self.snapshot_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.snapshots.lock().insert(
            kind,
            CachedSnapshot {
                generation,
                seq,
                entities: remote.clone(),
            },
        );
        self.resync(&binding, kind, remote).await
    }

    /// Brings one entity that just stopped being pending in line with the
    /// last snapshot of its kind.
    ///
    /// Snapshots delivered while the entity was pending left its local copy
    /// alone. With `after` set, only a snapshot that arrived after that
    /// sequence number is used: anything older may predate the push.
    async fn reconcile(
        &self,
        kind: EntityKind,
        id: &EntityId,
        generation: u64,
        after: Option<u64>,
    ) -> SyncResult<()> {
        let binding = self.kinds.get(kind)?;
        let _gate = binding.gate.lock().await;
        if !self.is_current(generation) || self.protected_ids(kind).contains(id) {
            return Ok(());
        }
        let remote = {
            let snapshots = self.snapshots.lock();
            let Some(cached) = snapshots.get(&kind) else {
                return Ok(());
            };
            if cached.generation != generation || after.is_some_and(|seq| cached.seq <= seq) {
                return Ok(());
            }
            cached.entities.iter().find(|entity| &entity.id == id).cloned()
        };

        let local = binding.local.get(id).await?;
        if local == remote {
            return Ok(());
        }
        match remote {
            Some(entity) => binding.local.sync(entity).await?,
            None => binding.local.delete(id).await?,
        }
        self.refresh_kind(&binding, kind).await?;
        debug!(kind = %kind, id = %id, "reconciled with last snapshot");
        Ok(())
    }

    /// Replaces the non-pending part of the local store with `remote`.
    ///
    /// Callers hold the kind gate.
    async fn resync(
        &self,
        binding: &KindBinding,
        kind: EntityKind,
        remote: Vec<Entity>,
    ) -> SyncResult<()> {
        let protected = self.protected_ids(kind);
        let trusted: HashMap<EntityId, Entity> = remote
            .into_iter()
            .filter(|entity| !protected.contains(&entity.id))
            .map(|entity| (entity.id.clone(), entity))
            .collect();
        let (preserved, settled): (Vec<Entity>, Vec<Entity>) = binding
            .local
            .get_all()
            .await?
            .into_iter()
            .partition(|entity| protected.contains(&entity.id));

        let unchanged = settled.len() == trusted.len()
            && settled
                .iter()
                .all(|entity| trusted.get(&entity.id) == Some(entity));
        if unchanged {
            trace!(kind = %kind, "snapshot matches local state");
            return Ok(());
        }

        let mut merged: Vec<Entity> = trusted.into_values().collect();
        merged.extend(preserved);
        binding.local.replace_all(merged).await?;
        self.refresh_kind(binding, kind).await?;
        debug!(kind = %kind, protected = protected.len(), "resynced from snapshot");
        Ok(())
    }

    fn spawn_reconcile(
        self: &Arc<Self>,
        kind: EntityKind,
        id: EntityId,
        generation: u64,
        after: Option<u64>,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = inner.reconcile(kind, &id, generation, after).await {
                warn!(kind = %kind, id = %id, error = %err, "reconcile failed");
            }
        });
    }

    /// Runs a local write under the kind gate and refreshes the read model.
    ///
    /// Releases the pending mark for `id` if the write fails.
    async fn apply_local<T, Fut>(
        &self,
        binding: &KindBinding,
        kind: EntityKind,
        id: &EntityId,
        write: Fut,
    ) -> SyncResult<T>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        let _gate = binding.gate.lock().await;
        let written = match write.await {
            Ok(written) => written,
            Err(err) => {
                self.pending.release(kind, id);
                return Err(err.into());
            }
        };
        if let Err(err) = self.refresh_kind(binding, kind).await {
            warn!(kind = %kind, error = %err, "read model refresh failed");
        }
        Ok(written)
    }

    /// Hands a local write to the push lane, or journals it when signed out.
    fn dispatch(self: &Arc<Self>, kind: EntityKind, op: PushOp) {
        let identity = self.identity.read().clone();
        let Some(user) = identity else {
            let id = op.id().clone();
            debug!(kind = %kind, id = %id, op = op.name(), "signed out, keeping write local");
            self.pending.release(kind, &id);
            self.journal.record(kind, id);
            return;
        };

        self.status.push_started();
        let job = PushJob {
            generation: self.generation.load(Ordering::SeqCst),
            user,
            kind,
            op,
        };
        let weak = Arc::downgrade(self);
        self.lane.submit(job, move |rx| {
            tokio::spawn(push_worker(weak, rx));
        });
    }

    async fn run_push(self: &Arc<Self>, job: PushJob) {
        let PushJob {
            generation,
            user,
            kind,
            op,
        } = job;
        let id = op.id().clone();

        let result = match self.kinds.get(kind) {
            Ok(binding) => {
                let pushed = match &op {
                    PushOp::Create(entity) => binding.remote.create(&user, entity).await,
                    PushOp::Update(entity) => binding.remote.update(&user, entity).await,
                    PushOp::Delete(id) => binding.remote.delete(&user, id).await,
                };
                pushed.map_err(SyncError::from)
            }
            Err(err) => Err(err),
        };

        // Marks from an older identity were dropped by `reset`.
        let current = self.is_current(generation);
        match result {
            Ok(()) => {
                let settled_at = self.snapshot_seq.load(Ordering::SeqCst);
                debug!(kind = %kind, id = %id, op = op.name(), "push settled");
                self.status.push_succeeded(kind, &id);
                if current {
                    let weak = Arc::downgrade(self);
                    let released = id.clone();
                    self.pending
                        .release_after(kind, id, self.config.grace_interval, move || {
                            if let Some(inner) = weak.upgrade() {
                                let after = Some(settled_at);
                                inner.spawn_reconcile(kind, released, generation, after);
                            }
                        });
                }
            }
            Err(err) => {
                let retryable = err.is_retryable();
                warn!(
                    kind = %kind,
                    id = %id,
                    op = op.name(),
                    error = %err,
                    retryable,
                    "push failed"
                );
                self.status.push_failed(kind, &id, err.to_string(), retryable);
                // A refused write is rolled back to the remote view; an
                // unreachable remote leaves the local write in place.
                if current && self.pending.release(kind, &id) && !retryable {
                    self.spawn_reconcile(kind, id, generation, None);
                }
            }
        }
    }

    async fn replay_journal(self: &Arc<Self>, kind: EntityKind) {
        let ids = self.journal.take(kind);
        if ids.is_empty() {
            return;
        }
        let binding = match self.kinds.get(kind) {
            Ok(binding) => binding,
            Err(err) => {
                warn!(kind = %kind, error = %err, "cannot replay offline writes");
                return;
            }
        };
        info!(kind = %kind, count = ids.len(), "pushing offline writes");
        for id in ids {
            self.pending.mark(kind, &id);
            match binding.local.get(&id).await {
                Ok(Some(entity)) => self.dispatch(kind, PushOp::Update(entity)),
                Ok(None) => self.dispatch(kind, PushOp::Delete(id)),
                Err(err) => {
                    self.pending.release(kind, &id);
                    self.status.push_started();
                    self.status.push_failed(kind, &id, err.to_string(), false);
                }
            }
        }
    }

    fn subscribe_kind(
        self: &Arc<Self>,
        user: &UserId,
        kind: EntityKind,
        generation: u64,
    ) -> SyncResult<Subscription> {
        let binding = self.kinds.get(kind)?;
        let weak: Weak<Self> = Arc::downgrade(self);
        let receiver = binding.remote.subscribe(user);
        Ok(Subscription::spawn(receiver, move |event, flag| {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else { return };
                match event {
                    Ok(entities) => {
                        let applied = inner
                            .apply_snapshot(kind, generation, entities, &flag)
                            .await;
                        if let Err(err) = applied {
                            warn!(kind = %kind, error = %err, "applying snapshot failed");
                        }
                    }
                    Err(err) => warn!(kind = %kind, error = %err, "subscription error"),
                }
            }
        }))
    }
}

async fn push_worker(engine: Weak<EngineInner>, mut rx: mpsc::UnboundedReceiver<PushJob>) {
    while let Some(job) = rx.recv().await {
        let Some(inner) = engine.upgrade() else { break };
        inner.run_push(job).await;
    }
}

/// The sync engine.
///
/// Cloning is cheap; clones share all state.
///
/// # Example
///
/// ```rust
/// use dayflow_core::{DeviceId, EntityDraft, EntityKind, UserId};
/// use dayflow_remote::MemoryRemote;
/// use dayflow_store::MemoryStore;
/// use dayflow_sync_engine::{KindTable, SyncConfig, SyncEngine};
/// use std::sync::Arc;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let remote = MemoryRemote::default().connect(DeviceId::from("phone"));
/// let mut kinds = KindTable::new();
/// kinds
///     .insert(
///         Arc::new(MemoryStore::new(EntityKind::Todo)),
///         Arc::new(remote.collection(EntityKind::Todo)),
///     )
///     .unwrap();
///
/// let engine = SyncEngine::new(SyncConfig::default(), kinds);
/// engine.set_identity(UserId::from("u1")).await.unwrap();
/// engine
///     .save_data(EntityKind::Todo, EntityDraft::new().field("title", "Buy milk"))
///     .await
///     .unwrap();
/// assert_eq!(engine.todos().len(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Creates a signed-out engine over the given store pairs.
    pub fn new(config: SyncConfig, kinds: KindTable) -> Self {
        let status = StatusTracker::new(config.max_failed_items);
        Self {
            inner: Arc::new(EngineInner {
                config,
                kinds,
                pending: PendingChangeSet::new(),
                journal: OfflineJournal::new(),
                status,
                read_model: ReadModel::new(),
                state: RwLock::new(SyncState::SignedOut),
                identity: RwLock::new(None),
                generation: AtomicU64::new(0),
                subscriptions: Mutex::new(HashMap::new()),
                snapshots: Mutex::new(HashMap::new()),
                snapshot_seq: AtomicU64::new(0),
                lane: PushLane::new(),
            }),
        }
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the signed-in user, if any.
    pub fn identity(&self) -> Option<UserId> {
        self.inner.identity.read().clone()
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        *self.inner.state.read()
    }

    /// Returns true while a bootstrap is running.
    pub fn syncing(&self) -> bool {
        self.state().is_syncing()
    }

    /// Returns a copy of the push status.
    pub fn sync_status(&self) -> SyncStatus {
        self.inner.status.snapshot()
    }

    /// Returns the read model.
    pub fn read_model(&self) -> &ReadModel {
        &self.inner.read_model
    }

    /// Returns all todos from the read model.
    pub fn todos(&self) -> Vec<Entity> {
        self.inner.read_model.todos()
    }

    /// Returns all routines from the read model.
    pub fn routines(&self) -> Vec<Entity> {
        self.inner.read_model.routines()
    }

    /// Returns all records from the read model.
    pub fn records(&self) -> Vec<Entity> {
        self.inner.read_model.records()
    }

    /// Returns all tags from the read model.
    pub fn tags(&self) -> Vec<Entity> {
        self.inner.read_model.tags()
    }

    /// Returns the set of entities with a write in flight.
    pub fn pending(&self) -> &PendingChangeSet {
        &self.inner.pending
    }

    /// Returns the writes made while signed out that await a push.
    pub fn journal(&self) -> &OfflineJournal {
        &self.inner.journal
    }

    /// Returns the number of installed live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .values()
            .filter(|subscription| subscription.is_active())
            .count()
    }

    /// Signs the engine in as `user`: bootstraps every kind, pushes writes
    /// made while signed out, then installs the live subscriptions.
    ///
    /// Any previous identity is torn down first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if the identity changed before the
    /// bootstrap finished; nothing is subscribed in that case. A kind whose
    /// bootstrap fails is logged and still subscribed.
    pub async fn set_identity(&self, user: UserId) -> SyncResult<()> {
        let inner = &self.inner;
        let generation = inner.reset(Some(user.clone()), SyncState::Bootstrapping);
        info!(user = %user, "bootstrap started");

        let kinds = inner.kinds.kinds();
        for &kind in &kinds {
            match inner.bootstrap_kind(&user, kind, generation).await {
                Ok(()) => {}
                Err(SyncError::Cancelled) => {
                    info!(user = %user, "bootstrap abandoned");
                    return Err(SyncError::Cancelled);
                }
                Err(err) => {
                    warn!(kind = %kind, error = %err, "bootstrap failed, live updates will resync");
                }
            }
        }
        inner.ensure_current(generation)?;

        for &kind in &kinds {
            inner.replay_journal(kind).await;
        }

        {
            let mut subscriptions = inner.subscriptions.lock();
            inner.ensure_current(generation)?;
            for &kind in &kinds {
                let subscription = inner.subscribe_kind(&user, kind, generation)?;
                subscriptions.insert(kind, subscription);
            }
            inner.set_state(SyncState::Live);
        }

        info!(user = %user, kinds = kinds.len(), "sync live");
        Ok(())
    }

    /// Tears down the current identity.
    ///
    /// Cancels every live subscription and grace timer and abandons a
    /// running bootstrap. Local data is kept.
    pub fn teardown(&self) {
        let previous = self.identity();
        self.inner.reset(None, SyncState::SignedOut);
        if let Some(user) = previous {
            info!(user = %user, "sync torn down");
        }
    }

    /// Creates an entity.
    ///
    /// For kinds with a natural key, a save whose key matches an existing
    /// entity updates that entity instead.
    ///
    /// # Errors
    ///
    /// Returns the local store's error if the write fails locally. Remote
    /// failures are recorded in [`SyncStatus::failed_items`] instead.
    pub async fn save_data(&self, kind: EntityKind, mut draft: EntityDraft) -> SyncResult<Entity> {
        let binding = self.inner.kinds.get(kind)?;

        let key = kind
            .natural_key()
            .and_then(|field| draft.fields.get(field))
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);
        if let Some(key) = key {
            if let Some(existing) = binding.local.find_by_key(&key).await? {
                debug!(kind = %kind, id = %existing.id, key = %key, "save matched existing entity");
                return self.update_data(kind, &existing.id, &draft.fields).await;
            }
        }

        let id = draft.id_or_generate();
        self.inner.pending.mark(kind, &id);
        let entity = self
            .inner
            .apply_local(&binding, kind, &id, binding.local.add(draft))
            .await?;
        self.inner.dispatch(kind, PushOp::Create(entity.clone()));
        Ok(entity)
    }

    /// Merges `updates` into an existing entity and pushes the result.
    ///
    /// # Errors
    ///
    /// Returns a not-found store error if the entity does not exist
    /// locally, or any other local store error.
    pub async fn update_data(
        &self,
        kind: EntityKind,
        id: &EntityId,
        updates: &Fields,
    ) -> SyncResult<Entity> {
        let binding = self.inner.kinds.get(kind)?;
        self.inner.pending.mark(kind, id);
        let entity = self
            .inner
            .apply_local(&binding, kind, id, binding.local.update(id, updates))
            .await?;
        self.inner.dispatch(kind, PushOp::Update(entity.clone()));
        Ok(entity)
    }

    /// Deletes an entity and pushes the delete.
    ///
    /// # Errors
    ///
    /// Returns the local store's error if the delete fails locally.
    pub async fn delete_data(&self, kind: EntityKind, id: &EntityId) -> SyncResult<()> {
        let binding = self.inner.kinds.get(kind)?;
        self.inner.pending.mark(kind, id);
        self.inner
            .apply_local(&binding, kind, id, binding.local.delete(id))
            .await?;
        self.inner.dispatch(kind, PushOp::Delete(id.clone()));
        Ok(())
    }

    /// Re-reads every local store into the read model.
    pub async fn refresh_data(&self) -> SyncResult<()> {
        for kind in self.inner.kinds.kinds() {
            let binding = self.inner.kinds.get(kind)?;
            self.inner.refresh_kind(&binding, kind).await?;
        }
        Ok(())
    }

    /// Foreground-resume hook: unconditionally refreshes the read model.
    pub async fn on_foreground(&self) {
        if let Err(err) = self.refresh_data().await {
            warn!(error = %err, "foreground refresh failed");
        }
    }

    /// Re-pushes the current local state of every failed item.
    ///
    /// Entities still present locally are written in full; missing ones
    /// are deleted remotely. Returns the number of pushes queued.
    ///
    /// Transient failures keep their local state until this is called, so
    /// the retry carries the user's write.
    ///
    /// # Errors
    ///
    /// Fails with [`SyncError::NotAuthenticated`] when signed out, or with
    /// a local store error.
    pub async fn retry_failed(&self) -> SyncResult<usize> {
        if self.identity().is_none() {
            return Err(SyncError::NotAuthenticated);
        }

        let failed = self.inner.status.snapshot().failed_items;
        let mut queued = 0;
        for item in failed {
            let binding = self.inner.kinds.get(item.kind)?;
            self.inner.pending.mark(item.kind, &item.id);
            let op = match binding.local.get(&item.id).await {
                Ok(Some(entity)) => PushOp::Update(entity),
                Ok(None) => PushOp::Delete(item.id.clone()),
                Err(err) => {
                    self.inner.pending.release(item.kind, &item.id);
                    return Err(err.into());
                }
            };
            self.inner.dispatch(item.kind, op);
            queued += 1;
        }

        if queued > 0 {
            info!(count = queued, "retrying failed pushes");
        }
        Ok(queued)
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("identity", &self.identity())
            .field("kinds", &self.inner.kinds.kinds())
            .finish()
    }
}
