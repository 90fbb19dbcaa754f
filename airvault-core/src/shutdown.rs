use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Set-once cooperative stop latch.
///
/// Every worker carries two of these: the supervisor-wide global flag and a
/// private local flag. Loops poll both once per iteration; neither delivers
/// an interrupt into a running loop body.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    set: AtomicBool,
    notify: Notify,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.inner.set.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set. Safe to call from several tasks.
    pub async fn wait(&self) {
        while !self.is_set() {
            let notified = self.inner.notify.notified();
            if self.is_set() {
                break;
            }
            notified.await;
        }
    }
}
