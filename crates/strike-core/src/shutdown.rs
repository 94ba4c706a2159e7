//! Cooperative shutdown signal
//!
//! Long waits (confirmation prompts, audit-log backoff) select on
//! [`ShutdownSignal::cancelled`] so that tearing the session down resolves
//! them promptly instead of leaving timers or tasks behind.

use tokio::sync::watch;

/// Fires the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown of every subscribed wait
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// New signal subscribed to this trigger
    #[must_use]
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Signal that never fires
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        Self { rx }
    }

    /// Whether shutdown was requested
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested
    ///
    /// If the trigger is dropped without firing, this never resolves.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Create a linked trigger/signal pair
#[must_use]
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}
