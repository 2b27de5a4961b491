//! Stopping blocking model work once the future that asked for it is gone.
//!
//! Tokio cannot abort a `spawn_blocking` closure that is already running, so
//! the closure polls a shared flag between model calls. The async side holds
//! a [`CancelGuard`]; dropping it (query cancelled, timeout elapsed) raises
//! the flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct CancelGuard {
    flag: Arc<AtomicBool>,
}

impl CancelGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn token(&self) -> CancelToken {
        CancelToken(Arc::clone(&self.flag))
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Read side of a [`CancelGuard`], moved into blocking closures.
#[derive(Debug, Clone)]
pub(crate) struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
