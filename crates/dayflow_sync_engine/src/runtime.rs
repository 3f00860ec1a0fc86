//! Composition root wiring the auth layer, session and engine together.

use crate::auth::AuthFacade;
use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::session::{SessionCoordinator, SessionNotice};
use dayflow_core::UserId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drives the session and the engine from identity changes.
///
/// When a user appears the runtime claims the account and then bootstraps
/// the engine. When the user goes away, including after a takeover, it
/// tears the engine down and ends the session.
pub struct ClientRuntime {
    engine: SyncEngine,
    session: Arc<SessionCoordinator>,
    auth: Arc<dyn AuthFacade>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ClientRuntime {
    /// Creates a runtime; nothing happens until [`ClientRuntime::start`].
    pub fn new(engine: SyncEngine, session: SessionCoordinator, auth: Arc<dyn AuthFacade>) -> Self {
        Self {
            engine,
            session: Arc::new(session),
            auth,
            watcher: Mutex::new(None),
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Returns the session coordinator.
    pub fn session(&self) -> &SessionCoordinator {
        &self.session
    }

    /// Returns a receiver for takeover notices.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.session.subscribe_notices()
    }

    /// Returns true once the identity watcher is running.
    pub fn is_running(&self) -> bool {
        self.watcher
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Starts following the auth layer's identity.
    ///
    /// Calling this again while running has no effect.
    pub fn start(&self) {
        let mut watcher = self.watcher.lock();
        if watcher.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let task = tokio::spawn(watch_identity(
            self.engine.clone(),
            self.session.clone(),
            self.auth.watch(),
        ));
        *watcher = Some(task);
    }

    /// Foreground-resume hook: refreshes the read model and heartbeats the
    /// session.
    pub async fn on_foreground(&self) {
        self.engine.on_foreground().await;
        if let Some(user) = self.engine.identity() {
            self.session.update_last_active(&user).await;
        }
    }

    /// Stops following identity changes and releases the account.
    pub async fn shutdown(&self) {
        let task = self.watcher.lock().take();
        if let Some(task) = task {
            task.abort();
        }
        let user = self.engine.identity();
        self.engine.teardown();
        if let Some(user) = user {
            self.session.end_session(&user).await;
        }
        info!("runtime shut down");
    }
}

impl Drop for ClientRuntime {
    fn drop(&mut self) {
        if let Some(task) = self.watcher.get_mut().take() {
            task.abort();
        }
    }
}

impl fmt::Debug for ClientRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRuntime")
            .field("engine", &self.engine)
            .field("session", &self.session.state())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn watch_identity(
    engine: SyncEngine,
    session: Arc<SessionCoordinator>,
    mut rx: watch::Receiver<Option<UserId>>,
) {
    let current_user = rx.clone();
    let mut current: Option<UserId> = None;

    loop {
        let next = rx.borrow_and_update().clone();
        if next != current {
            let previous = std::mem::replace(&mut current, next.clone());
            let transition = transition(&engine, &session, &current_user, previous, next);
            tokio::pin!(transition);

            let closed = tokio::select! {
                () = &mut transition => false,
                changed = rx.changed() => {
                    // Abandon the bootstrap; the session part finishes on its own.
                    engine.teardown();
                    transition.await;
                    changed.is_err()
                }
            };
            if closed {
                break;
            }
            // The value may have moved on while the transition ran.
            if *rx.borrow() != current {
                continue;
            }
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
    debug!("identity watcher stopped");
}

async fn transition(
    engine: &SyncEngine,
    session: &SessionCoordinator,
    current_user: &watch::Receiver<Option<UserId>>,
    previous: Option<UserId>,
    next: Option<UserId>,
) {
    if let Some(user) = previous {
        engine.teardown();
        session.end_session(&user).await;
    }
    let Some(user) = next else { return };

    if let Err(err) = session.start_session(&user).await {
        warn!(user = %user, error = %err, "session start failed, syncing unguarded");
    }
    if current_user.borrow().as_ref() != Some(&user) {
        debug!(user = %user, "identity changed during session start");
        return;
    }

    match engine.set_identity(user.clone()).await {
        Ok(()) => {}
        Err(SyncError::Cancelled) => debug!(user = %user, "bootstrap superseded"),
        Err(err) => warn!(user = %user, error = %err, "bootstrap failed"),
    }
}
