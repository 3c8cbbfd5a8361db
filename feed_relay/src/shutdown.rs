//! Process-wide shutdown request.
//!
//! `ShutdownHandle::trigger` is what the signal handler calls: one atomic store
//! and one non-blocking send on a bounded wake channel. Anything parked in
//! `ShutdownHandle::wait` returns as soon as the wake token arrives.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

/// Cloneable shutdown flag with a wake-up channel.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    /// Creates a handle with the flag cleared.
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    /// Requests shutdown and wakes a parked waiter. Never blocks.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Parks for up to `timeout` or until triggered. Returns `true` if
    /// shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_requested() {
            return true;
        }
        let _ = self.wake_rx.recv_timeout(timeout);
        self.is_requested()
    }
}
