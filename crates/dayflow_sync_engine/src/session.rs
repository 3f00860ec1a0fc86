//! Single-active-session enforcement.
//!
//! Every user has one session record in the remote store. Starting a
//! session overwrites it with a fresh session ID and subscribes to it; when
//! the subscription later shows a different ID, or the store starts
//! refusing this device's credential, another device has taken over and
//! this one signs out.
//!
//! ```text
//! Inactive ──start──▶ Starting ──▶ Active ──takeover──▶ Conflicted
//!                                    │
//!                                    └──────end───────▶ Ended
//! ```
//!
//! A new `start` is accepted from every state except `Starting`.

use crate::auth::AuthFacade;
use crate::config::SessionConfig;
use crate::error::{SyncError, SyncResult};
use dayflow_core::{SessionId, SessionRecord, UserId};
use dayflow_remote::{ActiveFlag, SessionStore, Snapshot, Subscription};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Lifecycle of this device's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been started.
    Inactive,
    /// The session record is being written.
    Starting,
    /// This device owns the account.
    Active,
    /// Another device took over; irreversible for this session.
    Conflicted,
    /// The session was ended locally.
    Ended,
}

impl SessionState {
    /// Returns true if this device currently owns the account.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    /// Returns true if a new session may be started.
    pub fn can_start(&self) -> bool {
        !matches!(self, SessionState::Starting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a session was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TakeoverReason {
    /// The record now carries another device's session ID.
    Superseded(SessionId),
    /// The store refused this device's credential on the session path.
    PermissionDenied,
}

/// User-facing notice emitted once per takeover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotice {
    /// Account that was taken over.
    pub user: UserId,
    /// The session that was lost.
    pub session_id: SessionId,
    /// How the takeover was detected.
    pub reason: TakeoverReason,
}

impl SessionNotice {
    /// Returns the text shown to the user.
    pub fn message(&self) -> &'static str {
        "Your account was signed in on another device. You have been signed out on this one."
    }
}

struct Inner {
    store: Arc<dyn SessionStore>,
    auth: Arc<dyn AuthFacade>,
    config: SessionConfig,
    state: RwLock<SessionState>,
    current: RwLock<Option<SessionId>>,
    conflict_fired: AtomicBool,
    epoch: AtomicU64,
    subscription: Mutex<Option<Subscription>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    notices: broadcast::Sender<SessionNotice>,
}

impl Inner {
    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        let from = *current;
        if from != state {
            trace!(from = %from, to = %state, "session state");
            *current = state;
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn stop_listening(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.cancel();
        }
        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.abort();
        }
    }

    async fn on_snapshot(
        &self,
        user: &UserId,
        own: &SessionId,
        epoch: u64,
        event: Snapshot<Option<SessionRecord>>,
    ) {
        match event {
            Ok(Some(record)) if !record.is_owned_by(own) => {
                self.takeover(user, epoch, TakeoverReason::Superseded(record.session_id))
                    .await;
            }
            Ok(Some(_)) => trace!(user = %user, "own session record observed"),
            Ok(None) => debug!(user = %user, "session record removed"),
            Err(err) if err.is_permission_denied() => {
                self.takeover(user, epoch, TakeoverReason::PermissionDenied)
                    .await;
            }
            Err(err) => warn!(user = %user, error = %err, "session subscription error"),
        }
    }

    async fn touch(&self, user: &UserId, epoch: u64) {
        match self.store.touch_session(user).await {
            Ok(()) => trace!(user = %user, "session heartbeat"),
            Err(err) if err.is_permission_denied() => {
                self.takeover(user, epoch, TakeoverReason::PermissionDenied)
                    .await;
            }
            Err(err) => debug!(user = %user, error = %err, "session heartbeat failed"),
        }
    }

    async fn takeover(&self, user: &UserId, epoch: u64, reason: TakeoverReason) {
        if !self.is_current(epoch) || self.state() != SessionState::Active {
            return;
        }
        if self.conflict_fired.swap(true, Ordering::SeqCst) {
            return;
        }

        self.set_state(SessionState::Conflicted);
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.cancel();
        }
        // Detach rather than abort: the takeover may be running on the
        // heartbeat task itself. It exits on its next tick.
        drop(self.heartbeat.lock().take());

        let session_id = self.current.read().clone();
        info!(user = %user, reason = ?reason, "session taken over by another device");
        if let Some(session_id) = session_id {
            let _ = self.notices.send(SessionNotice {
                user: user.clone(),
                session_id,
                reason,
            });
        }

        if let Err(err) = self.auth.sign_out().await {
            warn!(user = %user, error = %err, "forced sign-out failed");
        }
    }
}

/// Enforces at most one writable session per account across devices.
///
/// The coordinator is owned by the composition root; there is no global
/// instance.
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Creates a coordinator in the `Inactive` state.
    pub fn new(
        store: Arc<dyn SessionStore>,
        auth: Arc<dyn AuthFacade>,
        config: SessionConfig,
    ) -> Self {
        let (notices, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                store,
                auth,
                config,
                state: RwLock::new(SessionState::Inactive),
                current: RwLock::new(None),
                conflict_fired: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                subscription: Mutex::new(None),
                heartbeat: Mutex::new(None),
                notices,
            }),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Returns the ID of the session this device started last.
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.current.read().clone()
    }

    /// Returns true while the session record subscription is installed.
    pub fn is_listening(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Returns a receiver for takeover notices.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.inner.notices.subscribe()
    }

    /// Claims the account for this device.
    ///
    /// Overwrites the user's session record with a new session ID and
    /// subscribes to it.
    ///
    /// # Errors
    ///
    /// Fails if a start is already in progress, if the record cannot be
    /// written, or with [`SyncError::Cancelled`] if the session was ended
    /// while the write was in flight.
    pub async fn start_session(&self, user: &UserId) -> SyncResult<SessionId> {
        let state = self.state();
        if !state.can_start() {
            return Err(SyncError::InvalidStateTransition {
                from: state.to_string(),
                to: SessionState::Starting.to_string(),
            });
        }

        self.inner.stop_listening();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.conflict_fired.store(false, Ordering::SeqCst);
        self.inner.set_state(SessionState::Starting);

        let session_id = SessionId::generate();
        *self.inner.current.write() = Some(session_id.clone());

        let written = self
            .inner
            .store
            .write_session(user, SessionRecord::new(session_id.clone()))
            .await;
        if !self.inner.is_current(epoch) {
            return Err(SyncError::Cancelled);
        }
        if let Err(err) = written {
            self.inner.set_state(SessionState::Inactive);
            *self.inner.current.write() = None;
            return Err(err.into());
        }

        self.inner.set_state(SessionState::Active);
        let subscription = Subscription::spawn(self.inner.store.subscribe_session(user), {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            let user = user.clone();
            let own = session_id.clone();
            move |event, flag: ActiveFlag| {
                let weak = weak.clone();
                let user = user.clone();
                let own = own.clone();
                async move {
                    let Some(inner) = weak.upgrade() else { return };
                    if flag.is_active() && inner.is_current(epoch) {
                        inner.on_snapshot(&user, &own, epoch, event).await;
                    }
                }
            }
        });
        *self.inner.subscription.lock() = Some(subscription);
        self.spawn_heartbeat(user, epoch);

        info!(user = %user, session = %session_id, "session started");
        Ok(session_id)
    }

    /// Ends this device's session.
    ///
    /// The state becomes `Ended` before the subscription is cancelled. The
    /// remote record is deleted only if the session was active, no
    /// takeover was detected, and the record still carries this session's
    /// ID. Failures are logged and never returned. A conflicted session
    /// stays `Conflicted`.
    pub async fn end_session(&self, user: &UserId) {
        let previous = self.state();
        if matches!(
            previous,
            SessionState::Conflicted | SessionState::Inactive | SessionState::Ended
        ) {
            self.inner.stop_listening();
            return;
        }

        self.inner.set_state(SessionState::Ended);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.stop_listening();
        let own = self.inner.current.write().take();

        if previous != SessionState::Active || self.inner.conflict_fired.load(Ordering::SeqCst) {
            return;
        }
        let Some(own) = own else { return };

        match self.inner.store.get_session(user).await {
            Ok(Some(record)) if record.is_owned_by(&own) => {}
            Ok(_) => {
                debug!(user = %user, "session record no longer ours, leaving it");
                return;
            }
            Err(err) if err.is_permission_denied() => {
                debug!(user = %user, "session record no longer readable, leaving it");
                return;
            }
            Err(err) => {
                warn!(user = %user, error = %err, "could not read session record on end");
                return;
            }
        }

        match self.inner.store.delete_session(user).await {
            Ok(()) => info!(user = %user, session = %own, "session ended"),
            Err(err) if err.is_permission_denied() => {
                debug!(user = %user, "session record taken over before delete");
            }
            Err(err) => warn!(user = %user, error = %err, "could not delete session record"),
        }
    }

    /// Refreshes `last_active` on the session record.
    ///
    /// Does nothing unless the session is active. A permission failure is
    /// treated as a takeover; other failures are logged.
    pub async fn update_last_active(&self, user: &UserId) {
        if !self.state().is_active() {
            return;
        }
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        self.inner.touch(user, epoch).await;
    }

    fn spawn_heartbeat(&self, user: &UserId, epoch: u64) {
        let Some(period) = self.inner.config.heartbeat_interval else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let user = user.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.is_current(epoch) || !inner.state().is_active() {
                    break;
                }
                inner.touch(&user, epoch).await;
            }
        });
        *self.inner.heartbeat.lock() = Some(handle);
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.inner.stop_listening();
    }
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish()
    }
}
