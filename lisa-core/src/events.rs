//! Structured progress events for the loop.
//!
//! Every lifecycle moment is emitted twice: as a JSONL line appended to
//! `<cache>/logs/loop.log` (observable via `tail -f`), and to an optional
//! in-process channel a TUI can subscribe to. Writes are best-effort — a
//! broken log path never disrupts the loop. Agent output itself streams to
//! the per-issue log file, which a TUI tails directly.

use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use serde_json::{json, Value};

/// A lifecycle moment in the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// An issue was fetched from the tracker.
    IssueQueued { issue_id: String, title: String },
    /// A session started for an issue.
    IssueStarted { issue_id: String, title: String },
    /// A session completed and the issue was advanced to done.
    IssueCompleted {
        issue_id: String,
        pr_urls: Vec<String>,
    },
    /// An issue was rolled back to the pick-from state.
    IssueReverted { issue_id: String, reason: String },
    /// The tracker returned no work.
    WorkEmpty,
    /// The loop exited.
    WorkComplete,
    /// A non-fatal error inside the loop.
    Error { message: String },
}

impl LoopEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LoopEvent::IssueQueued { .. } => "issue_queued",
            LoopEvent::IssueStarted { .. } => "issue_started",
            LoopEvent::IssueCompleted { .. } => "issue_completed",
            LoopEvent::IssueReverted { .. } => "issue_reverted",
            LoopEvent::WorkEmpty => "work_empty",
            LoopEvent::WorkComplete => "work_complete",
            LoopEvent::Error { .. } => "error",
        }
    }

    fn to_json(&self) -> Value {
        match self {
            LoopEvent::IssueQueued { issue_id, title } => {
                json!({"event": self.name(), "issue": issue_id, "title": title})
            }
            LoopEvent::IssueStarted { issue_id, title } => {
                json!({"event": self.name(), "issue": issue_id, "title": title})
            }
            LoopEvent::IssueCompleted { issue_id, pr_urls } => {
                json!({"event": self.name(), "issue": issue_id, "pr_urls": pr_urls})
            }
            LoopEvent::IssueReverted { issue_id, reason } => {
                json!({"event": self.name(), "issue": issue_id, "reason": reason})
            }
            LoopEvent::WorkEmpty | LoopEvent::WorkComplete => json!({"event": self.name()}),
            LoopEvent::Error { message } => {
                json!({"event": self.name(), "message": message})
            }
        }
    }
}

/// Sink fanning events out to the JSONL log and an optional subscriber.
pub struct EventSink {
    log_path: Option<PathBuf>,
    channel: Option<Sender<LoopEvent>>,
}

impl EventSink {
    /// A sink writing to `<logs_dir>/loop.log`.
    pub fn new(logs_dir: &Path) -> Self {
        Self {
            log_path: Some(logs_dir.join("loop.log")),
            channel: None,
        }
    }

    /// A sink that drops everything (dry runs, tests).
    pub fn disabled() -> Self {
        Self {
            log_path: None,
            channel: None,
        }
    }

    /// Attach an in-process subscriber (the TUI).
    pub fn with_channel(mut self, tx: Sender<LoopEvent>) -> Self {
        self.channel = Some(tx);
        self
    }

    /// Emit an event to every attached sink. Never fails.
    pub fn emit(&self, event: LoopEvent) {
        if let Some(path) = &self.log_path {
            let mut obj = event.to_json();
            if let Some(map) = obj.as_object_mut() {
                map.insert(
                    "ts".to_string(),
                    Value::String(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                );
            }
            let mut line = obj.to_string();
            line.push('\n');
            if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
                let _ = f.write_all(line.as_bytes());
            }
        }
        if let Some(tx) = &self.channel {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use tempfile::TempDir;

    #[test]
    fn events_append_jsonl_lines() {
        let dir = TempDir::new().unwrap();
        let sink = EventSink::new(dir.path());
        sink.emit(LoopEvent::IssueQueued {
            issue_id: "INT-1".to_string(),
            title: "Add logging".to_string(),
        });
        sink.emit(LoopEvent::WorkComplete);

        let content = std::fs::read_to_string(dir.path().join("loop.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "issue_queued");
        assert_eq!(first["issue"], "INT-1");
        assert!(first["ts"].is_string());
    }

    #[test]
    fn channel_receives_events() {
        let (tx, rx) = channel();
        let sink = EventSink::disabled().with_channel(tx);
        sink.emit(LoopEvent::WorkEmpty);
        assert_eq!(rx.recv().unwrap(), LoopEvent::WorkEmpty);
    }

    #[test]
    fn dropped_subscriber_does_not_break_emit() {
        let (tx, rx) = channel();
        drop(rx);
        let sink = EventSink::disabled().with_channel(tx);
        sink.emit(LoopEvent::WorkComplete);
    }
}
