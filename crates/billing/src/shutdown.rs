//! Cooperative shutdown signal
//!
//! Workflows poll [`Shutdown::is_triggered`] between items so an in-flight
//! customer or transaction always completes before the run stops.

use std::sync::Arc;

use tokio::sync::watch;

/// Sending half; dropping it does not count as a shutdown request
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // send_replace never fails, even with no receivers left
        self.tx.send_replace(true);
    }
}

/// Receiving half, cheap to clone into every task
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    // Held only by `never()` so the channel stays open
    _sender: Option<Arc<watch::Sender<bool>>>,
}

impl Shutdown {
    /// A signal that never fires, for one-shot runs and tests
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _sender: Some(Arc::new(tx)),
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Pending forever if the trigger is dropped.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected trigger/receiver pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx, _sender: None })
}
