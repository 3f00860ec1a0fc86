//! Two devices signing into the same account through the composition root.

use dayflow_core::{DeviceId, EntityDraft, EntityKind, UserId};
use dayflow_remote::{MemoryRemote, MemoryRemoteConfig, SessionReadPolicy};
use dayflow_store::MemoryStore;
use dayflow_sync_engine::{
    AuthFacade, ClientRuntime, KindTable, MemoryAuth, SessionConfig, SessionCoordinator,
    SessionState, SyncConfig, SyncEngine, SyncState, TakeoverReason,
};
use std::sync::Arc;
use std::time::Duration;

struct Device {
    runtime: ClientRuntime,
    auth: Arc<MemoryAuth>,
}

fn device(remote: &MemoryRemote, name: &str, heartbeat: Option<Duration>) -> Device {
    let client = remote.connect(DeviceId::from(name));
    let mut kinds = KindTable::new();
    for kind in EntityKind::ALL {
        kinds
            .insert(
                Arc::new(MemoryStore::new(kind)),
                Arc::new(client.collection(kind)),
            )
            .unwrap();
    }
    let auth = Arc::new(MemoryAuth::new());
    let mut session_config = SessionConfig::new();
    if let Some(period) = heartbeat {
        session_config = session_config.with_heartbeat_interval(period);
    }
    let session = SessionCoordinator::new(Arc::new(client), auth.clone(), session_config);
    let engine = SyncEngine::new(SyncConfig::default(), kinds);
    let runtime = ClientRuntime::new(engine, session, auth.clone());
    runtime.start();
    Device { runtime, auth }
}

fn user() -> UserId {
    UserId::from("u1")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn takeover_signs_out_once(policy: SessionReadPolicy) {
    let remote = MemoryRemote::new(MemoryRemoteConfig::new().with_session_read_policy(policy));
    let a = device(&remote, "phone", None);
    let b = device(&remote, "tablet", None);
    let mut notices = a.runtime.subscribe_notices();

    a.auth.sign_in(user());
    settle().await;
    assert_eq!(a.runtime.session().state(), SessionState::Active);

    b.auth.sign_in(user());
    settle().await;

    assert_eq!(a.auth.sign_out_count(), 1);
    assert_eq!(a.auth.current_user(), None);
    assert_eq!(a.runtime.session().state(), SessionState::Conflicted);
    assert_eq!(a.runtime.engine().state(), SyncState::SignedOut);

    assert_eq!(b.runtime.session().state(), SessionState::Active);
    assert_eq!(b.runtime.engine().state(), SyncState::Live);
    assert_eq!(remote.session_owner(&user()), Some(DeviceId::from("tablet")));

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.user, user());
    match policy {
        SessionReadPolicy::Open => assert!(matches!(notice.reason, TakeoverReason::Superseded(_))),
        SessionReadPolicy::OwnerOnly => {
            assert!(matches!(notice.reason, TakeoverReason::PermissionDenied))
        }
    }

    // The loser's sign-out must not delete the winner's record.
    settle().await;
    assert_eq!(remote.session_owner(&user()), Some(DeviceId::from("tablet")));
    assert_eq!(a.auth.sign_out_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn takeover_with_open_reads() {
    takeover_signs_out_once(SessionReadPolicy::Open).await;
}

#[tokio::test(start_paused = true)]
async fn takeover_with_owner_only_reads() {
    takeover_signs_out_once(SessionReadPolicy::OwnerOnly).await;
}

#[tokio::test(start_paused = true)]
async fn superseded_heartbeat_triggers_takeover() {
    let remote = MemoryRemote::new(
        MemoryRemoteConfig::new().with_notify_delay(Duration::from_secs(60)),
    );
    let a = device(&remote, "phone", Some(Duration::from_secs(5)));
    let b = device(&remote, "tablet", None);

    a.auth.sign_in(user());
    tokio::time::sleep(Duration::from_secs(61)).await;
    b.auth.sign_in(user());
    settle().await;
    assert_eq!(a.runtime.session().state(), SessionState::Active);

    // The heartbeat hits the store before the record change is delivered.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(a.runtime.session().state(), SessionState::Conflicted);
    assert_eq!(a.auth.sign_out_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn winner_keeps_syncing_after_takeover() {
    let remote = MemoryRemote::default();
    let a = device(&remote, "phone", None);
    let b = device(&remote, "tablet", None);

    a.auth.sign_in(user());
    settle().await;
    a.runtime
        .engine()
        .save_data(EntityKind::Todo, EntityDraft::new().with_id("t1"))
        .await
        .unwrap();
    settle().await;

    b.auth.sign_in(user());
    settle().await;
    assert_eq!(b.runtime.engine().todos().len(), 1);

    b.runtime
        .engine()
        .save_data(EntityKind::Todo, EntityDraft::new().with_id("t2"))
        .await
        .unwrap();
    settle().await;
    assert_eq!(remote.entities(&user(), EntityKind::Todo).len(), 2);

    // The signed-out loser keeps its local copy but no longer follows the remote.
    assert_eq!(a.runtime.engine().todos().len(), 1);
    assert_eq!(a.runtime.engine().subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn foreground_refreshes_and_heartbeats() {
    let remote = MemoryRemote::default();
    let a = device(&remote, "phone", None);
    a.auth.sign_in(user());
    settle().await;
    let before = remote.session(&user()).unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    a.runtime.on_foreground().await;

    let after = remote.session(&user()).unwrap();
    assert_eq!(after.session_id, before.session_id);
    assert!(after.last_active >= before.last_active);
}
