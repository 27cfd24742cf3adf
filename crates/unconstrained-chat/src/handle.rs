//! A cloneable handle for poking a session from external code.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

/// A cloneable handle for poking a session from external code.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct ChatHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) is_busy: Arc<AtomicBool>,
}

impl ChatHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            is_busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel the turn in flight, if any.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Get the token for the current turn.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Replace the token so a new turn is not born cancelled.
    pub(crate) fn reset_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    /// Mark the session busy. Returns `None` if a turn already holds it.
    pub fn try_begin(&self) -> Option<BusyGuard> {
        self.is_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard {
                is_busy: Arc::clone(&self.is_busy),
            })
    }

    /// Whether a turn is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.is_busy.load(Ordering::Acquire)
    }
}

/// Holds the busy flag for one turn; releases it on drop.
pub struct BusyGuard {
    is_busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.is_busy.store(false, Ordering::Release);
    }
}
