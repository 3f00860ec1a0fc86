//! End-to-end flows of the sync engine against the in-process backend.

use async_trait::async_trait;
use dayflow_core::{DeviceId, Entity, EntityDraft, EntityId, EntityKind, Fields, UserId};
use dayflow_remote::{
    MemoryRemote, MemoryRemoteConfig, RemoteClient, RemoteCollection, RemoteResult,
    SnapshotReceiver,
};
use dayflow_store::{FileStore, LocalStore, MemoryStore, StoreError, StoreResult};
use dayflow_sync_engine::{KindTable, SyncConfig, SyncEngine, SyncError, SyncState};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn user() -> UserId {
    UserId::from("u1")
}

fn memory_engine(client: &RemoteClient) -> (SyncEngine, Vec<Arc<MemoryStore>>) {
    let mut kinds = KindTable::new();
    let mut stores = Vec::new();
    for kind in EntityKind::ALL {
        let store = Arc::new(MemoryStore::new(kind));
        stores.push(Arc::clone(&store));
        kinds
            .insert(store, Arc::new(client.collection(kind)))
            .unwrap();
    }
    (SyncEngine::new(SyncConfig::default(), kinds), stores)
}

fn sorted(mut entities: Vec<Entity>) -> Vec<Entity> {
    entities.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    entities
}

fn title(value: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("title".into(), json!(value));
    fields
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

#[tokio::test(start_paused = true)]
async fn stale_echo_does_not_clobber_pending_update() {
    let remote = MemoryRemote::new(
        MemoryRemoteConfig::new().with_notify_delay(Duration::from_millis(200)),
    );
    let phone = remote.connect(DeviceId::from("phone"));
    let (engine, _) = memory_engine(&phone);
    engine.set_identity(user()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let todo = engine
        .save_data(EntityKind::Todo, EntityDraft::new().with_id("t1").field("title", "old"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine
        .update_data(EntityKind::Todo, &todo.id, &title("new"))
        .await
        .unwrap();

    // Only the echo of the create, carrying the old title, has arrived.
    tokio::time::sleep(Duration::from_millis(195)).await;
    assert_eq!(engine.todos().len(), 1);
    assert_eq!(engine.todos()[0].get_str("title"), Some("new"));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(engine.pending().is_empty());
    assert_eq!(engine.todos(), remote.entities(&user(), EntityKind::Todo));
    assert_eq!(engine.todos()[0].get_str("title"), Some("new"));
    assert!(engine.sync_status().is_clean());
}

#[tokio::test(start_paused = true)]
async fn offline_create_reaches_remote_after_login() {
    let remote = MemoryRemote::default();
    let client = remote.connect(DeviceId::from("phone"));
    let (engine, _) = memory_engine(&client);

    let t1 = engine
        .save_data(EntityKind::Todo, EntityDraft::new().with_id("t1").field("title", "offline"))
        .await
        .unwrap();
    assert_eq!(engine.todos(), vec![t1.clone()]);
    assert_eq!(engine.sync_status().pending_count, 0);

    engine.set_identity(user()).await.unwrap();
    settle().await;

    assert_eq!(engine.todos(), vec![t1.clone()]);
    assert_eq!(remote.entities(&user(), EntityKind::Todo), vec![t1]);
    let status = engine.sync_status();
    assert!(status.failed_items.is_empty());
    assert_eq!(status.pending_count, 0);
    assert!(engine.journal().is_empty());
}

#[tokio::test(start_paused = true)]
async fn offline_delete_survives_bootstrap() {
    let remote = MemoryRemote::default();
    let seed = EntityDraft::new().with_id("g1").field("name", "old").into_entity();
    let client = remote.connect(DeviceId::from("phone"));
    client
        .collection(EntityKind::Tag)
        .create(&user(), &seed)
        .await
        .unwrap();

    let store = Arc::new(MemoryStore::with_entities(EntityKind::Tag, vec![seed.clone()]));
    let mut kinds = KindTable::new();
    kinds
        .insert(store, Arc::new(client.collection(EntityKind::Tag)))
        .unwrap();
    let engine = SyncEngine::new(SyncConfig::default(), kinds);

    engine.delete_data(EntityKind::Tag, &seed.id).await.unwrap();
    engine.set_identity(user()).await.unwrap();
    settle().await;

    assert!(engine.tags().is_empty());
    assert!(remote.entities(&user(), EntityKind::Tag).is_empty());
}

#[tokio::test(start_paused = true)]
async fn local_failure_is_returned_and_not_pushed() {
    let remote = MemoryRemote::default();
    let client = remote.connect(DeviceId::from("phone"));
    let (engine, stores) = memory_engine(&client);
    engine.set_identity(user()).await.unwrap();

    stores[0].set_unavailable(true);
    let err = engine
        .save_data(EntityKind::Todo, EntityDraft::new().with_id("t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Unavailable(_))));
    assert!(engine.pending().is_empty());
    assert_eq!(engine.sync_status().pending_count, 0);

    settle().await;
    assert!(remote.entities(&user(), EntityKind::Todo).is_empty());
}

#[tokio::test(start_paused = true)]
async fn devices_converge_after_grace() {
    let remote = MemoryRemote::new(
        MemoryRemoteConfig::new()
            .with_write_latency(Duration::from_millis(15))
            .with_notify_delay(Duration::from_millis(5)),
    );
    let phone = remote.connect(DeviceId::from("phone"));
    let tablet = remote.connect(DeviceId::from("tablet"));
    let (a, _) = memory_engine(&phone);
    let (b, _) = memory_engine(&tablet);
    a.set_identity(user()).await.unwrap();
    b.set_identity(user()).await.unwrap();

    for i in 0..5 {
        a.save_data(EntityKind::Routine, EntityDraft::new().with_id(format!("a{i}")))
            .await
            .unwrap();
        b.save_data(EntityKind::Routine, EntityDraft::new().with_id(format!("b{i}")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(7)).await;
    }
    settle().await;
    a.update_data(EntityKind::Routine, &EntityId::from("b1"), &title("edited"))
        .await
        .unwrap();
    b.delete_data(EntityKind::Routine, &EntityId::from("a2"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;

    let truth = sorted(remote.entities(&user(), EntityKind::Routine));
    assert_eq!(truth.len(), 9);
    assert_eq!(sorted(a.routines()), truth);
    assert_eq!(sorted(b.routines()), truth);
    assert!(a.pending().is_empty() && b.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn file_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::default();
    let client = remote.connect(DeviceId::from("phone"));

    let open = || {
        let mut kinds = KindTable::new();
        for kind in EntityKind::ALL {
            kinds
                .insert(
                    Arc::new(FileStore::open(dir.path(), kind).unwrap()),
                    Arc::new(client.collection(kind)),
                )
                .unwrap();
        }
        SyncEngine::new(SyncConfig::default(), kinds)
    };

    let engine = open();
    engine.set_identity(user()).await.unwrap();
    let record = engine
        .save_data(
            EntityKind::Record,
            EntityDraft::new().field("date", "2024-06-01").field("mood", 4),
        )
        .await
        .unwrap();
    settle().await;
    engine.teardown();
    drop(engine);

    let reopened = open();
    assert!(reopened.records().is_empty());
    reopened.refresh_data().await.unwrap();
    assert_eq!(reopened.records(), vec![record.clone()]);

    reopened.set_identity(user()).await.unwrap();
    assert_eq!(reopened.state(), SyncState::Live);
    assert_eq!(reopened.records(), vec![record]);
}

type Log = Arc<Mutex<Vec<String>>>;

struct LoggingStore {
    inner: MemoryStore,
    log: Log,
}

#[async_trait]
impl LocalStore for LoggingStore {
    fn kind(&self) -> EntityKind {
        self.inner.kind()
    }

    async fn get_all(&self) -> StoreResult<Vec<Entity>> {
        self.inner.get_all().await
    }

    async fn get(&self, id: &EntityId) -> StoreResult<Option<Entity>> {
        self.inner.get(id).await
    }

    async fn add(&self, draft: EntityDraft) -> StoreResult<Entity> {
        self.log.lock().push(format!("write {}", self.kind()));
        self.inner.add(draft).await
    }

    async fn update(&self, id: &EntityId, patch: &Fields) -> StoreResult<Entity> {
        self.log.lock().push(format!("write {}", self.kind()));
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: &EntityId) -> StoreResult<()> {
        self.log.lock().push(format!("write {}", self.kind()));
        self.inner.delete(id).await
    }

    async fn sync(&self, entity: Entity) -> StoreResult<()> {
        self.log.lock().push(format!("write {}", self.kind()));
        self.inner.sync(entity).await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.log.lock().push(format!("write {}", self.kind()));
        self.inner.clear().await
    }

    async fn replace_all(&self, entities: Vec<Entity>) -> StoreResult<()> {
        self.log.lock().push(format!("write {}", self.kind()));
        self.inner.replace_all(entities).await
    }

    async fn find_by_key(&self, key: &str) -> StoreResult<Option<Entity>> {
        self.inner.find_by_key(key).await
    }
}

struct LoggingCollection<R> {
    inner: R,
    log: Log,
}

#[async_trait]
impl<R: RemoteCollection> RemoteCollection for LoggingCollection<R> {
    fn kind(&self) -> EntityKind {
        self.inner.kind()
    }

    async fn get_all_by_user(&self, user: &UserId) -> RemoteResult<Vec<Entity>> {
        self.inner.get_all_by_user(user).await
    }

    async fn create(&self, user: &UserId, entity: &Entity) -> RemoteResult<()> {
        self.inner.create(user, entity).await
    }

    async fn update(&self, user: &UserId, entity: &Entity) -> RemoteResult<()> {
        self.inner.update(user, entity).await
    }

    async fn delete(&self, user: &UserId, id: &EntityId) -> RemoteResult<()> {
        self.inner.delete(user, id).await
    }

    fn subscribe(&self, user: &UserId) -> SnapshotReceiver<Vec<Entity>> {
        self.log.lock().push(format!("subscribe {}", self.kind()));
        self.inner.subscribe(user)
    }
}

#[tokio::test(start_paused = true)]
async fn every_kind_bootstraps_before_any_subscription() {
    let remote = MemoryRemote::default();
    let client = remote.connect(DeviceId::from("phone"));
    for kind in EntityKind::ALL {
        let seed = EntityDraft::new().with_id(format!("{kind}-1")).into_entity();
        client.collection(kind).create(&user(), &seed).await.unwrap();
    }

    let log: Log = Arc::default();
    let mut kinds = KindTable::new();
    for kind in EntityKind::ALL {
        kinds
            .insert(
                Arc::new(LoggingStore {
                    inner: MemoryStore::new(kind),
                    log: Arc::clone(&log),
                }),
                Arc::new(LoggingCollection {
                    inner: client.collection(kind),
                    log: Arc::clone(&log),
                }),
            )
            .unwrap();
    }
    let engine = SyncEngine::new(SyncConfig::default(), kinds);
    engine.set_identity(user()).await.unwrap();

    let log = log.lock().clone();
    let last_write = log.iter().rposition(|e| e.starts_with("write")).unwrap();
    let first_subscribe = log.iter().position(|e| e.starts_with("subscribe")).unwrap();
    assert!(last_write < first_subscribe, "{log:?}");
    assert_eq!(log.iter().filter(|e| e.starts_with("subscribe")).count(), 4);

    let first_write = |kind: EntityKind| {
        log.iter()
            .position(|e| *e == format!("write {kind}"))
            .unwrap()
    };
    assert!(first_write(EntityKind::Todo) < first_write(EntityKind::Routine));
    assert!(first_write(EntityKind::Record) < first_write(EntityKind::Tag));
}
