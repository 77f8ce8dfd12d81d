//! Batch cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::ports::TranscodePort;

/// Shared cancellation flag. Once set it stays set.
#[derive(Debug, Default)]
pub struct CancellationToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set the flag and wake every waiter. Returns `false` if it was already set.
    pub fn set(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Resolves once the flag is set
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Turns a user's close/back action into batch cancellation
#[derive(Clone)]
pub struct CancellationController {
    token: Arc<CancellationToken>,
    backend: Arc<dyn TranscodePort>,
}

impl CancellationController {
    pub fn new(token: Arc<CancellationToken>, backend: Arc<dyn TranscodePort>) -> Self {
        Self { token, backend }
    }

    pub fn token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.token)
    }

    /// Idempotent; safe to call from any thread and after the batch ended
    pub fn request_cancel(&self) {
        if !self.token.set() {
            debug!("Cancellation already requested");
            return;
        }
        info!("Cancellation requested");
        self.backend.cancel();
        self.backend.clear_sessions();
    }
}
