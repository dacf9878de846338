//! Cancellable idle-expiry timers

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// A one-shot timer that runs a callback unless cancelled first
///
/// Dropping the timer cancels it. Dropping it after the callback already
/// ran does nothing.
#[derive(Debug)]
pub struct IdleTimer {
    id: u64,
    token: CancellationToken,
}

impl IdleTimer {
    /// Arm a timer firing after `timeout`
    ///
    /// `on_expire` receives the timer's id so the owner can check that the
    /// timer that fired is still the current one.
    pub fn start<F, Fut>(timeout: Duration, on_expire: F) -> Self
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let task_token = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {
                    trace!(timer_id = id, "Idle timer cancelled");
                }
                _ = tokio::time::sleep(timeout) => {
                    if !task_token.is_cancelled() {
                        on_expire(id).await;
                    }
                }
            }
        });

        Self { id, token }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
