//! Cooperative stop signal for long-running loops.
//!
//! Every place the rotation loop yields races a [`ShutdownListener`], so a
//! triggered shutdown is observed within one suspension point.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Owning side of the stop signal. Dropping it also counts as shutdown.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Cloneable receiving side handed to loops.
#[derive(Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered or the trigger is dropped.
    pub async fn triggered(&mut self) {
        // Err means the sender is gone, which is treated as shutdown
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Sleep for `duration`. Returns `false` if shutdown interrupted the sleep.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.triggered() => false,
        }
    }

    /// Run `fut` to completion unless shutdown fires first.
    pub async fn run_until_triggered<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if self.is_triggered() {
            return None;
        }
        tokio::select! {
            out = fut => Some(out),
            _ = self.triggered() => None,
        }
    }
}
