//! Push subscriptions and their cancellation handles.
//!
//! A remote store delivers snapshots through a [`SnapshotReceiver`]. The
//! consumer turns the receiver into a [`Subscription`] by handing it a
//! callback; the subscription runs the callback on its own task, one event
//! at a time and in delivery order, until it is cancelled.
//!
//! Cancellation is idempotent and never interrupts a callback that is
//! already running. Callbacks receive an [`ActiveFlag`] so they can check,
//! after their own suspension points, whether the subscription was
//! cancelled underneath them.

use crate::error::RemoteError;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// One event delivered by a subscription: the new state, or an error.
pub type Snapshot<T> = Result<T, RemoteError>;

/// A queued event with the instant it becomes visible to the consumer.
#[derive(Debug)]
struct Delivery<T> {
    at: Instant,
    event: Snapshot<T>,
}

/// Creates a connected sender/receiver pair.
///
/// Backends keep the sender and hand the receiver to the subscriber.
pub fn snapshot_channel<T>() -> (SnapshotSender<T>, SnapshotReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SnapshotSender { tx },
        SnapshotReceiver { rx, pending: None },
    )
}

/// Producer half of a snapshot channel.
pub struct SnapshotSender<T> {
    tx: mpsc::UnboundedSender<Delivery<T>>,
}

impl<T> SnapshotSender<T> {
    /// Queues an event for immediate delivery.
    ///
    /// Returns false if the receiver is gone.
    pub fn send(&self, event: Snapshot<T>) -> bool {
        self.send_after(Duration::ZERO, event)
    }

    /// Queues an event that becomes visible after `delay`.
    ///
    /// Events are still received in the order they were sent.
    pub fn send_after(&self, delay: Duration, event: Snapshot<T>) -> bool {
        let at = Instant::now() + delay;
        self.tx.send(Delivery { at, event }).is_ok()
    }

    /// Returns true if the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Clone for SnapshotSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for SnapshotSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumer half of a snapshot channel.
pub struct SnapshotReceiver<T> {
    rx: mpsc::UnboundedReceiver<Delivery<T>>,
    pending: Option<Delivery<T>>,
}

impl<T> SnapshotReceiver<T> {
    /// Waits for the next event.
    ///
    /// Returns `None` once every sender is gone and the queue is drained.
    /// Cancel safe: an event whose delay has not elapsed stays queued.
    pub async fn recv(&mut self) -> Option<Snapshot<T>> {
        if self.pending.is_none() {
            self.pending = Some(self.rx.recv().await?);
        }
        let at = self.pending.as_ref().map(|d| d.at)?;
        tokio::time::sleep_until(at).await;
        self.pending.take().map(|d| d.event)
    }

    /// Returns an already visible event without waiting, if any.
    pub fn try_recv(&mut self) -> Option<Snapshot<T>> {
        if self.pending.is_none() {
            self.pending = self.rx.try_recv().ok();
        }
        match &self.pending {
            Some(delivery) if delivery.at <= Instant::now() => {
                self.pending.take().map(|d| d.event)
            }
            _ => None,
        }
    }
}

impl<T> fmt::Debug for SnapshotReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotReceiver").finish_non_exhaustive()
    }
}

/// Shared view of whether a subscription is still active.
#[derive(Debug, Clone)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    /// Returns true until the owning subscription is cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a running subscription.
///
/// Dropping the handle cancels the subscription.
pub struct Subscription {
    active: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Spawns a task that feeds every event from `receiver` to `handler`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T, F, Fut>(mut receiver: SnapshotReceiver<T>, mut handler: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(Snapshot<T>, ActiveFlag) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        let task = tokio::spawn({
            let active = Arc::clone(&active);
            let shutdown = Arc::clone(&shutdown);
            async move {
                loop {
                    tokio::select! {
                        biased;
                        () = shutdown.notified() => break,
                        event = receiver.recv() => {
                            let Some(event) = event else { break };
                            if !active.load(Ordering::SeqCst) {
                                break;
                            }
                            handler(event, ActiveFlag(Arc::clone(&active))).await;
                        }
                    }
                }
                active.store(false, Ordering::SeqCst);
                trace!("subscription task finished");
            }
        });

        Self {
            active,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stops delivery of further events.
    ///
    /// Returns true if this call performed the cancellation, false if the
    /// subscription was already inactive.
    pub fn cancel(&self) -> bool {
        if self.active.swap(false, Ordering::SeqCst) {
            self.shutdown.notify_one();
            true
        } else {
            false
        }
    }

    /// Returns true until the subscription is cancelled or its source closes.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits for the subscription task to exit.
    ///
    /// A callback running at cancellation time completes first.
    pub async fn finished(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(
        seen: &Arc<Mutex<Vec<u32>>>,
    ) -> impl FnMut(Snapshot<u32>, ActiveFlag) -> std::future::Ready<()> {
        let seen = Arc::clone(seen);
        move |event, _| {
            if let Ok(value) = event {
                seen.lock().push(value);
            }
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn events_arrive_in_order_after_delay() {
        let (tx, mut rx) = snapshot_channel::<u32>();
        tx.send_after(Duration::from_millis(100), Ok(1));
        tx.send_after(Duration::from_millis(100), Ok(2));

        assert!(rx.try_recv().is_none());
        let start = Instant::now();
        assert_eq!(rx.recv().await, Some(Ok(1)));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(rx.try_recv(), Some(Ok(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_delivers_until_cancelled() {
        let (tx, rx) = snapshot_channel::<u32>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = Subscription::spawn(rx, counting(&seen));

        tx.send(Ok(1));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(sub.cancel());
        assert!(!sub.cancel());
        tx.send(Ok(2));
        tokio::time::sleep(Duration::from_millis(1)).await;

        sub.finished().await;
        assert_eq!(*seen.lock(), vec![1]);
        assert!(!sub.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_queued_events() {
        let (tx, rx) = snapshot_channel::<u32>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        tx.send_after(Duration::from_millis(50), Ok(1));
        let sub = Subscription::spawn(rx, counting(&seen));

        sub.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sub.finished().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn running_handler_observes_cancellation() {
        let (tx, rx) = snapshot_channel::<u32>();
        let applied = Arc::new(AtomicUsize::new(0));
        let sub = Subscription::spawn(rx, {
            let applied = Arc::clone(&applied);
            move |_, flag: ActiveFlag| {
                let applied = Arc::clone(&applied);
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    if flag.is_active() {
                        applied.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tx.send(Ok(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        sub.cancel();
        sub.finished().await;
        assert_eq!(applied.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn source_closing_deactivates() {
        let (tx, rx) = snapshot_channel::<u32>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = Subscription::spawn(rx, counting(&seen));
        drop(tx);
        sub.finished().await;
        assert!(!sub.is_active());
    }
}
