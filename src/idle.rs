//! Idle shutdown governor bounding host cost lifetime.
//!
//! The host is ephemeral: once no client activity arrives for the idle
//! window, it terminates itself. One last-activity instant, one watch task;
//! the expiry action fires at most once since the process ceases to exist.
//!
//! Liveness probes (`GET /health`) deliberately do NOT count as activity —
//! treating them as activity would let a monitoring loop keep a dead
//! session alive forever.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Process-wide activity timer. `touch` on every real inbound request.
#[derive(Debug)]
pub struct IdleGovernor {
    window: Duration,
    last_activity: Mutex<Instant>,
    fired: AtomicBool,
}

impl IdleGovernor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_activity: Mutex::new(Instant::now()),
            fired: AtomicBool::new(false),
        }
    }

    /// Record client activity, pushing the shutdown deadline out.
    pub fn touch(&self) {
        *self.last_activity.lock().expect("idle governor lock") = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .expect("idle governor lock")
            .elapsed()
    }

    /// Whether the expiry action has already run.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Spawn the watch task. `on_expire` runs exactly once, after the idle
    /// window elapses with no intervening `touch`. Production passes a
    /// closure that exits the process; tests pass a channel send.
    pub fn spawn_watch(
        self: std::sync::Arc<Self>,
        on_expire: impl FnOnce() + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let governor = self;
        tokio::spawn(async move {
            loop {
                let idle = governor.idle_for();
                if idle >= governor.window {
                    if !governor.fired.swap(true, Ordering::SeqCst) {
                        tracing::warn!(
                            idle_secs = idle.as_secs(),
                            "idle window expired, shutting down host"
                        );
                        on_expire();
                    }
                    return;
                }
                // Sleep until the current deadline; a touch moves it and the
                // next iteration re-checks.
                tokio::time::sleep(governor.window - idle).await;
            }
        })
    }
}

/// Expiry action used by the serve command: terminate the host process.
pub fn exit_host() {
    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn fires_exactly_once_after_idle_window() {
        let governor = Arc::new(IdleGovernor::new(Duration::from_millis(50)));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        let handle = governor.clone().spawn_watch(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        handle.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(governor.has_fired());
    }

    #[tokio::test]
    async fn touch_prevents_shutdown() {
        let governor = Arc::new(IdleGovernor::new(Duration::from_millis(80)));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        let _handle = governor.clone().spawn_watch(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Keep touching at intervals shorter than the window
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            governor.touch();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!governor.has_fired());

        // Stop touching; expiry follows
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn idle_for_grows_without_touch() {
        let governor = IdleGovernor::new(Duration::from_secs(600));
        std::thread::sleep(Duration::from_millis(10));
        assert!(governor.idle_for() >= Duration::from_millis(10));
        governor.touch();
        assert!(governor.idle_for() < Duration::from_millis(10));
    }
}
