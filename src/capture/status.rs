use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Save feedback shown next to the editor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error(String),
}

impl SaveStatus {
    pub fn label(&self) -> &str {
        match self {
            Self::Idle => "",
            Self::Saving => "● Saving...",
            Self::Saved => "✓ Saved",
            Self::Error(_) => "✕ Error",
        }
    }
}

struct Shared {
    tx: watch::Sender<SaveStatus>,
    /// Bumped on every transition so a stale `Saved -> Idle` timer can tell it lost.
    epoch: AtomicU64,
    display: Duration,
    revert: Mutex<Option<JoinHandle<()>>>,
}

/// The idle/saving/saved/error state machine, observable through a watch channel.
#[derive(Clone)]
pub struct SaveTracker {
    shared: Arc<Shared>,
}

impl SaveTracker {
    /// `display` is how long `Saved` lingers before falling back to `Idle`.
    pub fn new(display: Duration) -> Self {
        let (tx, _rx) = watch::channel(SaveStatus::Idle);
        Self {
            shared: Arc::new(Shared {
                tx,
                epoch: AtomicU64::new(0),
                display,
                revert: Mutex::new(None),
            }),
        }
    }

    pub fn current(&self) -> SaveStatus {
        self.shared.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.shared.tx.subscribe()
    }

    /// Any state -> `Saving`.
    pub fn begin(&self) {
        self.transition(SaveStatus::Saving);
    }

    /// `Saving` -> `Saved`, then `Idle` once the display window passes.
    pub fn succeed(&self) {
        let epoch = self.transition(SaveStatus::Saved);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(shared.display).await;
            if shared.epoch.load(Ordering::SeqCst) == epoch {
                shared.tx.send_replace(SaveStatus::Idle);
            }
        });
        if let Ok(mut revert) = self.shared.revert.lock() {
            *revert = Some(handle);
        }
    }

    /// `Saving` -> `Error`; holds until the next `begin`.
    pub fn fail(&self, message: impl Into<String>) {
        self.transition(SaveStatus::Error(message.into()));
    }

    fn transition(&self, next: SaveStatus) -> u64 {
        if let Ok(mut revert) = self.shared.revert.lock() {
            if let Some(handle) = revert.take() {
                handle.abort();
            }
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let prev = self.shared.tx.send_replace(next.clone());
        log::debug!("Save status {:?} -> {:?}", prev, next);
        epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn saved_reverts_to_idle_after_window() {
        let tracker = SaveTracker::new(Duration::from_secs(2));
        tracker.begin();
        assert_eq!(tracker.current(), SaveStatus::Saving);
        tracker.succeed();
        assert_eq!(tracker.current(), SaveStatus::Saved);

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(tracker.current(), SaveStatus::Saved);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(tracker.current(), SaveStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn new_save_cancels_pending_reversion() {
        let tracker = SaveTracker::new(Duration::from_secs(2));
        tracker.begin();
        tracker.succeed();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tracker.begin();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(tracker.current(), SaveStatus::Saving);
    }

    #[tokio::test(start_paused = true)]
    async fn error_holds_until_next_attempt() {
        let tracker = SaveTracker::new(Duration::from_secs(2));
        let mut rx = tracker.subscribe();
        tracker.begin();
        tracker.fail("store returned 503");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(tracker.current(), SaveStatus::Error("store returned 503".into()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SaveStatus::Error("store returned 503".into()));

        tracker.begin();
        assert_eq!(tracker.current(), SaveStatus::Saving);
    }
}
