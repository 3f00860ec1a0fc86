//! Several devices sharing one backend through the public contract.

use dayflow_core::{DeviceId, EntityDraft, EntityKind, SessionId, SessionRecord, UserId};
use dayflow_remote::{
    MemoryRemote, MemoryRemoteConfig, RemoteCollection, SessionStore, Subscription,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn writes_fan_out_to_every_device() {
    let remote = MemoryRemote::new(
        MemoryRemoteConfig::new().with_notify_delay(Duration::from_millis(20)),
    );
    let user = UserId::from("u1");
    let phone = remote.connect(DeviceId::from("phone")).collection(EntityKind::Routine);
    let tablet = remote.connect(DeviceId::from("tablet")).collection(EntityKind::Routine);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sub = Subscription::spawn(tablet.subscribe(&user), {
        let seen = Arc::clone(&seen);
        move |snapshot, _| {
            if let Ok(entities) = snapshot {
                seen.lock().push(entities.len());
            }
            std::future::ready(())
        }
    });

    for i in 0..3 {
        let routine = EntityDraft::new()
            .with_id(format!("r{i}"))
            .field("name", "stretch")
            .into_entity();
        phone.create(&user, &routine).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
    assert!(sub.cancel());
}

#[tokio::test]
async fn last_writer_owns_the_session() {
    let remote = MemoryRemote::default();
    let user = UserId::from("u1");
    let devices: Vec<_> = (0..4)
        .map(|i| remote.connect(DeviceId::new(format!("d{i}"))))
        .collect();

    for (i, device) in devices.iter().enumerate() {
        device
            .write_session(&user, SessionRecord::new(SessionId::new(format!("s{i}"))))
            .await
            .unwrap();
    }

    assert_eq!(remote.session_owner(&user), Some(DeviceId::from("d3")));
    for device in &devices[..3] {
        let err = device.touch_session(&user).await.unwrap_err();
        assert!(err.is_permission_denied());
    }
    devices[3].touch_session(&user).await.unwrap();
}
