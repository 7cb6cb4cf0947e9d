/*!
 * Utility functions and helpers for RelayBox.
 *
 * This module provides the level-triggered [`Signal`] used for connection
 * readiness and shutdown, plus small numeric helpers.
 */
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

/// A level-triggered flag that tasks can wait on.
///
/// Cloning a `Signal` yields a handle to the same flag. Waiters wake as soon
/// as the flag is set; clearing it makes later waits block again.
#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    /// Create a cleared signal
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag and wake every waiter
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Clear the flag
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Current state of the flag
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is set
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Wait until the flag is set or `duration` elapses.
    ///
    /// Returns the state of the flag when the wait ends.
    pub async fn wait_timeout(&self, duration: Duration) -> bool {
        if timeout(duration, self.wait()).await.is_ok() {
            return true;
        }
        self.is_set()
    }
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
