//! One-shot lifecycle signals shared between a stream and its owner.

use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative shutdown request, raised by the owner and polled by the read loop.
///
/// Clones observe the same signal. Raising is idempotent.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// Create a signal that has not been raised.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown.
    pub fn raise(&self) {
        self.tx.send_if_modified(|raised| !std::mem::replace(raised, true));
    }

    /// Non-blocking check.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal is raised.
    pub async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once raised.
        let _ = rx.wait_for(|raised| *raised).await;
    }
}

/// Completion marker, raised exactly once by the read loop after teardown.
#[derive(Debug, Clone)]
pub struct DoneSignal {
    rx: watch::Receiver<bool>,
}

impl DoneSignal {
    /// Non-blocking check.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the stream has stopped.
    ///
    /// Also returns if the read loop went away without firing, e.g. on panic.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Write side of a [`DoneSignal`]. Firing consumes it.
#[derive(Debug)]
pub(crate) struct DoneTrigger {
    tx: watch::Sender<bool>,
}

impl DoneTrigger {
    pub(crate) fn fire(self) {
        self.tx.send_replace(true);
    }
}

/// Create a linked trigger and signal.
pub(crate) fn done_pair() -> (DoneTrigger, DoneSignal) {
    let (tx, rx) = watch::channel(false);
    (DoneTrigger { tx }, DoneSignal { rx })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[test]
    fn test_stop_raise_is_idempotent() {
        let stop = StopSignal::new();
        let observer = stop.clone();
        assert!(!observer.is_raised());

        stop.raise();
        stop.raise();
        assert!(observer.is_raised());
        assert!(stop.is_raised());
    }

    #[test]
    fn test_stop_raised_wakes_waiter() {
        let stop = StopSignal::new();
        let mut waiter = task::spawn(stop.raised());
        assert_pending!(waiter.poll());

        stop.raise();
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());

        // Already raised: ready on first poll.
        let mut late = task::spawn(stop.raised());
        assert_ready!(late.poll());
    }

    #[tokio::test]
    async fn test_done_fires_for_every_observer() {
        let (trigger, done) = done_pair();
        let other = done.clone();
        assert!(!done.is_done());

        let waiter = tokio::spawn(async move { other.wait().await });
        trigger.fire();

        waiter.await.unwrap();
        assert!(done.is_done());
        done.wait().await;
        done.wait().await;
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let (trigger, done) = done_pair();
        drop(trigger);

        tokio::time::timeout(Duration::from_secs(1), done.wait())
            .await
            .expect("wait should return once the trigger is gone");
        assert!(!done.is_done());
    }
}
