//! Cancellable, drainable one-shot timer (spec.md §9: "timers must be
//! cancellable and drainable... stop-then-drain is idempotent and
//! race-free"). Backs [`crate::session`]'s card-removal timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Fires `on_fire` once after `duration` unless cancelled first.
pub struct OneShotTimer {
    handle: Option<JoinHandle<()>>,
    cancel: Option<oneshot::Sender<()>>,
    fired: Arc<AtomicBool>,
}

impl OneShotTimer {
    /// `on_fire` is called, and its returned future awaited, inside this
    /// timer's own task — so `stop_and_drain` (which awaits that task)
    /// always observes the callback fully run, with no second detached
    /// task left to race a future re-arm.
    pub fn start<F, Fut>(duration: Duration, on_fire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let fired = Arc::new(AtomicBool::new(false));
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let fired_for_task = fired.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    fired_for_task.store(true, Ordering::SeqCst);
                    on_fire().await;
                }
                _ = cancel_rx => {}
            }
        });

        Self {
            handle: Some(handle),
            cancel: Some(cancel_tx),
            fired,
        }
    }

    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Cancels the timer (a no-op if it already fired) and waits for its
    /// task to settle. Calling this more than once is safe.
    pub async fn stop_and_drain(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
