//! The auth layer as seen by the sync components.

use crate::error::SyncResult;
use async_trait::async_trait;
use dayflow_core::UserId;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::info;

/// Supplies the authenticated identity and its changes.
///
/// Credential verification happens elsewhere; the sync components only
/// need to know who is signed in and to force a sign-out on takeover.
#[async_trait]
pub trait AuthFacade: Send + Sync {
    /// Returns the signed-in user, if any.
    fn current_user(&self) -> Option<UserId>;

    /// Returns a receiver that observes every identity change.
    fn watch(&self) -> watch::Receiver<Option<UserId>>;

    /// Signs the current user out.
    async fn sign_out(&self) -> SyncResult<()>;
}

/// An in-memory auth layer for tests and simulations.
#[derive(Debug)]
pub struct MemoryAuth {
    identity: watch::Sender<Option<UserId>>,
    sign_outs: AtomicUsize,
}

impl MemoryAuth {
    /// Creates a signed-out auth layer.
    pub fn new() -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            identity,
            sign_outs: AtomicUsize::new(0),
        }
    }

    /// Signs `user` in, replacing any current identity.
    pub fn sign_in(&self, user: UserId) {
        info!(user = %user, "signed in");
        self.identity.send_replace(Some(user));
    }

    /// Returns how many times [`AuthFacade::sign_out`] was called.
    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthFacade for MemoryAuth {
    fn current_user(&self) -> Option<UserId> {
        self.identity.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<UserId>> {
        self.identity.subscribe()
    }

    async fn sign_out(&self) -> SyncResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        if let Some(user) = self.identity.send_replace(None) {
            info!(user = %user, "signed out");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_and_out() {
        let auth = MemoryAuth::new();
        let mut rx = auth.watch();
        assert_eq!(auth.current_user(), None);

        auth.sign_in(UserId::from("u1"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().clone(), Some(UserId::from("u1")));

        auth.sign_out().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), None);
        assert_eq!(auth.sign_out_count(), 1);
    }
}
