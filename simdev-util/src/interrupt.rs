use std::sync::Arc;

use tokio::sync::watch;

/// A one-shot stop signal shared between a task and its owner.
///
/// Once triggered the interrupt stays triggered, triggering it again is a
/// no-op. Clones observe the same signal.
#[derive(Clone, Debug)]
pub struct Interrupt(Arc<watch::Sender<bool>>);

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    /// Raise the signal, waking up every waiter
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until the signal is raised.
    ///
    /// Returns immediately if the interrupt was already triggered.
    pub async fn wait(&self) {
        let mut rx = self.0.subscribe();
        // the sender lives as long as `self`, so the channel cannot close
        // while we wait
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}
