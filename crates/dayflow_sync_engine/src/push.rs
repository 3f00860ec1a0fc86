//! Ordered background delivery of local writes to the remote store.

use dayflow_core::{Entity, EntityId, EntityKind, UserId};
use parking_lot::Mutex;
use std::fmt;
use tokio::sync::mpsc;

/// One remote write.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PushOp {
    /// Create a new document.
    Create(Entity),
    /// Write the full document, creating it if needed.
    Update(Entity),
    /// Delete the document.
    Delete(EntityId),
}

impl PushOp {
    pub(crate) fn id(&self) -> &EntityId {
        match self {
            PushOp::Create(entity) | PushOp::Update(entity) => &entity.id,
            PushOp::Delete(id) => id,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            PushOp::Create(_) => "create",
            PushOp::Update(_) => "update",
            PushOp::Delete(_) => "delete",
        }
    }
}

/// A push queued for the worker.
#[derive(Debug)]
pub(crate) struct PushJob {
    /// Identity generation the write was made under.
    pub(crate) generation: u64,
    pub(crate) user: UserId,
    pub(crate) kind: EntityKind,
    pub(crate) op: PushOp,
}

/// FIFO queue feeding a single worker task.
///
/// Pushes are issued in the order the mutations were applied locally, so
/// two quick writes to the same entity reach the remote store in order.
/// The worker is started lazily and restarted if it has gone away.
pub(crate) struct PushLane {
    tx: Mutex<Option<mpsc::UnboundedSender<PushJob>>>,
}

impl PushLane {
    pub(crate) fn new() -> Self {
        Self {
            tx: Mutex::new(None),
        }
    }

    /// Queues `job`, calling `start` to launch a worker when none is running.
    pub(crate) fn submit<F>(&self, job: PushJob, start: F)
    where
        F: FnOnce(mpsc::UnboundedReceiver<PushJob>),
    {
        let mut tx = self.tx.lock();
        let job = match tx.as_ref() {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // Cannot fail: the receiver is still held here.
        let _ = sender.send(job);
        *tx = Some(sender);
        start(receiver);
    }
}

impl fmt::Debug for PushLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushLane")
            .field("running", &self.tx.lock().is_some())
            .finish()
    }
}
