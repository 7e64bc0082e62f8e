//! Single-slot retry timer
//!
//! The identity resolver gets exactly one pending re-attempt at a time:
//! scheduling while a timer is live is a no-op, and cancelling clears the
//! slot without touching any data.

use std::time::Duration;
use tokio::task::JoinHandle;

/// A single cancellable delayed-fire slot (not a queue).
pub(crate) struct RetrySlot {
    handle: Option<JoinHandle<()>>,
}

impl RetrySlot {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Schedule `fire` to run after `delay`.
    ///
    /// No-op while a previously scheduled timer is still pending.
    pub fn schedule<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_pending() {
            return;
        }

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        }));
    }

    /// Abort any pending timer and clear the slot.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a timer is scheduled and has not fired yet.
    pub fn is_pending(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for RetrySlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
