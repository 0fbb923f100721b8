use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A re-armable quiet-period timer.
///
/// Each `arm` replaces the pending timer. When a timer fires, its action is
/// spawned as a separate task, so a later `arm`/`cancel` only ever stops timers
/// that are still sleeping and never an action already running.
pub struct Debouncer {
    window: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
        }
    }

    /// Cancel any pending timer and schedule `action` after the window.
    pub fn arm<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            tokio::spawn(action());
        });
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(prev) = pending.replace(handle) {
                prev.abort();
            }
        }
    }

    /// Cancel the pending timer. Returns true if one was still waiting.
    pub fn cancel(&self) -> bool {
        let Ok(mut pending) = self.pending.lock() else {
            return false;
        };
        match pending.take() {
            Some(handle) => {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .ok()
            .and_then(|p| p.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_action(count: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_fire() {
        let debouncer = Debouncer::new(Duration::from_secs(2));
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            debouncer.arm(counter_action(&count));
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let debouncer = Debouncer::new(Duration::from_secs(2));
        let count = Arc::new(AtomicUsize::new(0));
        debouncer.arm(counter_action(&count));
        assert!(debouncer.cancel());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!debouncer.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_does_not_abort_running_action() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        debouncer.arm(move || async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            d.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        // The first action is mid-flight; re-arming must leave it alone.
        debouncer.arm(|| async {});
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
