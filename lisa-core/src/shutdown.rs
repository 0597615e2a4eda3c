//! Signal-driven cleanup protocol.
//!
//! SIGINT/SIGTERM handlers only flip atomics; a watcher thread notices the
//! flag, rolls the in-flight issue back to its previous state (bounded to
//! five seconds) and exits 130. A second signal while shutting down exits
//! immediately. The active-cleanup slot holds at most one entry — an issue
//! is in-progress on the tracker iff this slot (and the session behind it)
//! exists.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::tracker::Tracker;

/// Exit code for signal-driven shutdown.
pub const SIGNAL_EXIT_CODE: i32 = 130;

/// How long the rollback may take before we give up and exit anyway.
const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_sig: libc::c_int) {
    if SHUTDOWN.swap(true, Ordering::SeqCst) {
        // Second signal: force immediate exit. _exit is async-signal-safe.
        unsafe { libc::_exit(SIGNAL_EXIT_CODE) };
    }
}

/// True once a SIGINT/SIGTERM has been received.
pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// What the signal path needs to unstick the tracker.
pub struct ActiveCleanup {
    pub issue_id: String,
    pub previous_status: String,
    pub tracker: Arc<dyn Tracker>,
}

/// Process-wide state shared between the main loop and the signal path.
///
/// The watcher thread spawned by [`ProcessContext::install`] is the only
/// consumer of the slot on shutdown; the main loop writes the slot before a
/// session's first suspension point and clears it after its last state
/// change.
#[derive(Clone)]
pub struct ProcessContext {
    active: Arc<Mutex<Option<ActiveCleanup>>>,
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessContext {
    /// A context without signal handling (tests, dry runs).
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Register SIGINT/SIGTERM handlers and the shutdown watcher thread.
    pub fn install() -> Self {
        let ctx = Self::new();
        unsafe {
            libc::signal(
                libc::SIGINT,
                handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
            );
            libc::signal(
                libc::SIGTERM,
                handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
            );
        }

        let active = Arc::clone(&ctx.active);
        std::thread::spawn(move || loop {
            if SHUTDOWN.load(Ordering::SeqCst) {
                let cleanup = active.lock().unwrap_or_else(|p| p.into_inner()).take();
                if let Some(cleanup) = cleanup {
                    eprintln!(
                        "\nlisa: interrupted — returning {} to '{}'",
                        cleanup.issue_id, cleanup.previous_status
                    );
                    if !rollback_with_timeout(cleanup, ROLLBACK_TIMEOUT) {
                        eprintln!("lisa: rollback did not complete in time");
                    }
                }
                std::process::exit(SIGNAL_EXIT_CODE);
            }
            std::thread::sleep(Duration::from_millis(100));
        });

        ctx
    }

    /// Record the in-flight issue. Replaces any previous entry.
    pub fn set_active(&self, cleanup: ActiveCleanup) {
        *self.active.lock().unwrap_or_else(|p| p.into_inner()) = Some(cleanup);
    }

    /// Clear the slot after the session's last tracker state change.
    pub fn clear_active(&self) {
        *self.active.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Whether a session is currently in flight.
    pub fn has_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }
}

/// Attempt the tracker rollback on a helper thread, waiting at most
/// `timeout`. Returns true if the rollback completed successfully in time.
pub fn rollback_with_timeout(cleanup: ActiveCleanup, timeout: Duration) -> bool {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let ok = cleanup
            .tracker
            .update_status(&cleanup.issue_id, &cleanup.previous_status)
            .is_ok();
        let _ = tx.send(ok);
    });
    rx.recv_timeout(timeout).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::issue::Issue;
    use anyhow::Result;
    use std::sync::atomic::AtomicUsize;

    struct RecordingTracker {
        updates: Mutex<Vec<(String, String)>>,
        delay: Duration,
    }

    impl RecordingTracker {
        fn new(delay: Duration) -> Self {
            Self {
                updates: Mutex::new(Vec::new()),
                delay,
            }
        }
    }

    impl Tracker for RecordingTracker {
        fn name(&self) -> &str {
            "recording"
        }
        fn fetch_next_issue(&self, _source: &SourceConfig) -> Result<Option<Issue>> {
            Ok(None)
        }
        fn fetch_issue_by_id(&self, _id: &str) -> Result<Option<Issue>> {
            Ok(None)
        }
        fn update_status(&self, id: &str, state: &str) -> Result<()> {
            std::thread::sleep(self.delay);
            self.updates
                .lock()
                .unwrap()
                .push((id.to_string(), state.to_string()));
            Ok(())
        }
        fn attach_pull_request(&self, _id: &str, _pr_url: &str) -> Result<()> {
            Ok(())
        }
        fn complete_issue(
            &self,
            _id: &str,
            _done_state: &str,
            _remove_label: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }
        fn remove_label(&self, _id: &str, _label: &str) -> Result<()> {
            Ok(())
        }
        fn list_issues(&self, _source: &SourceConfig) -> Result<Vec<Issue>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn slot_holds_at_most_one_entry() {
        let ctx = ProcessContext::new();
        let tracker = Arc::new(RecordingTracker::new(Duration::ZERO));
        assert!(!ctx.has_active());

        ctx.set_active(ActiveCleanup {
            issue_id: "INT-1".to_string(),
            previous_status: "Todo".to_string(),
            tracker: tracker.clone(),
        });
        ctx.set_active(ActiveCleanup {
            issue_id: "INT-2".to_string(),
            previous_status: "Todo".to_string(),
            tracker,
        });
        assert!(ctx.has_active());

        ctx.clear_active();
        assert!(!ctx.has_active());
    }

    #[test]
    fn rollback_completes_within_timeout() {
        let tracker = Arc::new(RecordingTracker::new(Duration::from_millis(50)));
        let ok = rollback_with_timeout(
            ActiveCleanup {
                issue_id: "INT-200".to_string(),
                previous_status: "Todo".to_string(),
                tracker: tracker.clone(),
            },
            Duration::from_secs(5),
        );
        assert!(ok);
        assert_eq!(
            tracker.updates.lock().unwrap().as_slice(),
            &[("INT-200".to_string(), "Todo".to_string())]
        );
    }

    #[test]
    fn slow_rollback_hits_the_timeout() {
        let tracker = Arc::new(RecordingTracker::new(Duration::from_secs(10)));
        let ok = rollback_with_timeout(
            ActiveCleanup {
                issue_id: "INT-201".to_string(),
                previous_status: "Todo".to_string(),
                tracker,
            },
            Duration::from_millis(100),
        );
        assert!(!ok);
    }

    #[test]
    fn failing_rollback_reports_false() {
        struct FailingTracker(AtomicUsize);
        impl Tracker for FailingTracker {
            fn name(&self) -> &str {
                "failing"
            }
            fn fetch_next_issue(&self, _s: &SourceConfig) -> Result<Option<Issue>> {
                Ok(None)
            }
            fn fetch_issue_by_id(&self, _id: &str) -> Result<Option<Issue>> {
                Ok(None)
            }
            fn update_status(&self, _id: &str, _state: &str) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("tracker is down")
            }
            fn attach_pull_request(&self, _id: &str, _pr: &str) -> Result<()> {
                Ok(())
            }
            fn complete_issue(&self, _id: &str, _d: &str, _l: Option<&str>) -> Result<()> {
                Ok(())
            }
            fn remove_label(&self, _id: &str, _l: &str) -> Result<()> {
                Ok(())
            }
            fn list_issues(&self, _s: &SourceConfig) -> Result<Vec<Issue>> {
                Ok(Vec::new())
            }
        }

        let ok = rollback_with_timeout(
            ActiveCleanup {
                issue_id: "INT-202".to_string(),
                previous_status: "Todo".to_string(),
                tracker: Arc::new(FailingTracker(AtomicUsize::new(0))),
            },
            Duration::from_secs(1),
        );
        assert!(!ok);
    }
}
