//! Watchdog that kills agents whose working tree stops changing.
//!
//! Every `check_interval` the overseer computes a snapshot of the agent's
//! working tree (`git status --porcelain` plus the current HEAD). If the
//! snapshot stays identical for `stuck_threshold` seconds the agent gets a
//! SIGTERM and the handle records the kill. The agent runner appends
//! [`OVERSEER_SENTINEL`] to the captured output so the classifier treats the
//! failure as eligible for fallback.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Marker appended to a killed agent's output. Contains the token the
/// eligibility classifier matches on.
pub const OVERSEER_SENTINEL: &str =
    "[lisa-overseer] agent terminated: working tree unchanged past stuck threshold";

#[derive(Debug, Clone)]
pub struct OverseerConfig {
    pub enabled: bool,
    pub check_interval: Duration,
    pub stuck_threshold: Duration,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(30),
            stuck_threshold: Duration::from_secs(300),
        }
    }
}

/// Handle to a running watchdog.
pub struct OverseerHandle {
    stop: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OverseerHandle {
    /// Cancel the watchdog. Idempotent; joins the background thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }

    /// True if the watchdog killed the process. Stable after the process
    /// exits.
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    fn inert() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(true)),
            killed: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl Drop for OverseerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start watching `pid` with the git snapshot of `cwd`.
pub fn start(pid: u32, cwd: &Path, config: &OverseerConfig) -> OverseerHandle {
    let dir = cwd.to_path_buf();
    start_with_snapshot(pid, config, move || git_snapshot(&dir))
}

/// Start watching `pid` with an injectable snapshot function.
///
/// A `None` snapshot is a fetch error and is swallowed — it never counts
/// toward the stuck timer.
pub fn start_with_snapshot<F>(pid: u32, config: &OverseerConfig, snapshot: F) -> OverseerHandle
where
    F: Fn() -> Option<String> + Send + 'static,
{
    if !config.enabled {
        return OverseerHandle::inert();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let killed = Arc::new(AtomicBool::new(false));
    let check_interval = config.check_interval;
    let stuck_threshold = config.stuck_threshold;

    let thread = {
        let stop = Arc::clone(&stop);
        let killed = Arc::clone(&killed);
        std::thread::spawn(move || {
            let mut last_snapshot: Option<String> = None;
            let mut last_change = Instant::now();

            loop {
                if sleep_interruptible(check_interval, &stop) {
                    return;
                }

                match snapshot() {
                    // The first observation only seeds the baseline.
                    Some(current) if last_snapshot.is_none() => {
                        last_snapshot = Some(current);
                    }
                    Some(current) => {
                        if last_snapshot.as_ref() != Some(&current) {
                            last_snapshot = Some(current);
                            last_change = Instant::now();
                        }
                    }
                    None => {
                        last_change = Instant::now();
                    }
                }

                if last_change.elapsed() >= stuck_threshold {
                    // Fires at most once per handle.
                    send_sigterm(pid);
                    killed.store(true, Ordering::SeqCst);
                    return;
                }
            }
        })
    };

    OverseerHandle {
        stop,
        killed,
        thread: Some(thread),
    }
}

/// Sleep for `duration` in short slices. Returns true if `stop` was set.
fn sleep_interruptible(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if stop.load(Ordering::SeqCst) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    stop.load(Ordering::SeqCst)
}

/// Deterministic snapshot of a working tree: porcelain status plus HEAD.
fn git_snapshot(cwd: &PathBuf) -> Option<String> {
    let status = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(cwd)
        .stderr(Stdio::null())
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let head = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(cwd)
        .stderr(Stdio::null())
        .output()
        .ok()?;
    let mut snap = String::from_utf8_lossy(&status.stdout).to_string();
    snap.push('\n');
    snap.push_str(String::from_utf8_lossy(&head.stdout).trim());
    Some(snap)
}

/// Send SIGTERM so the agent can shut down cleanly.
fn send_sigterm(pid: u32) {
    let _ = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}
