//! The main loop.
//!
//! Fetch an issue, move it to in-progress, run one session, advance or roll
//! back the tracker, cool down, repeat. The loop survives anything a session
//! throws at it; the only self-initiated stop is complete provider
//! exhaustion, which leaves the issue in-progress for the next run's orphan
//! sweep to reclaim.

use anyhow::Result;
use std::collections::HashSet;
use std::io::Write as IoWrite;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::classifier::is_complete_provider_exhaustion;
use crate::config::{LisaConfig, SourceConfig};
use crate::events::{EventSink, LoopEvent};
use crate::issue::Issue;
use crate::session::SessionResult;
use crate::shutdown::{shutdown_requested, ActiveCleanup, ProcessContext};
use crate::tracker::Tracker;

/// Runtime switches for one loop invocation.
#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    /// Process one session and exit.
    pub once: bool,
    /// Max sessions this run; 0 = use the config, which may be unbounded.
    pub limit: u64,
    /// Log intent without side effects.
    pub dry_run: bool,
    /// Run one explicit issue instead of the queue.
    pub issue_id: Option<String>,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Queue drained, limit reached, `--once`, or shutdown.
    Completed,
    /// Every provider failed transiently; the in-flight issue was left
    /// in-progress on purpose.
    ProvidersExhausted,
}

/// Reclaim issues stranded in the in-progress state by a previous crash.
///
/// Fetches from a synthetic source whose pick_from is the real in-progress
/// state and moves each hit back. Bounded: stops on the first fetch or
/// update failure, when no more orphans are returned, or if the tracker
/// hands back an issue it already handed back.
pub fn orphan_sweep(tracker: &dyn Tracker, source: &SourceConfig) -> usize {
    let mut synthetic = source.clone();
    synthetic.pick_from = source.in_progress.clone();

    let mut reclaimed = 0;
    let mut seen: HashSet<String> = HashSet::new();
    loop {
        match tracker.fetch_next_issue(&synthetic) {
            Ok(Some(issue)) => {
                if !seen.insert(issue.id.clone()) {
                    break;
                }
                match tracker.update_status(&issue.id, &source.pick_from) {
                    Ok(()) => {
                        println!(
                            "[{}] [sweep] reclaimed orphan {} → '{}'",
                            timestamp(),
                            issue.id,
                            source.pick_from
                        );
                        reclaimed += 1;
                    }
                    Err(e) => {
                        eprintln!("[{}] [sweep] failed to reclaim {}: {e}", timestamp(), issue.id);
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("[{}] [sweep] fetch failed: {e}", timestamp());
                break;
            }
        }
    }
    reclaimed
}

/// Drive sessions until the queue drains, a stop condition hits, or the
/// providers are exhausted.
///
/// `session_fn` runs one session for one issue; it is injected so the loop's
/// state machine can be exercised without spawning agents.
pub fn run_loop<F>(
    config: &LisaConfig,
    tracker: &Arc<dyn Tracker>,
    ctx: &ProcessContext,
    events: &EventSink,
    opts: &LoopOptions,
    mut session_fn: F,
) -> Result<LoopOutcome>
where
    F: FnMut(&mut Issue) -> Result<SessionResult>,
{
    let source = &config.source_config;
    let max_sessions = if opts.limit > 0 {
        opts.limit
    } else {
        config.loop_config.max_sessions
    };

    println!("lisa run");
    println!("Source: {} / provider: {}", config.source, config.provider);
    println!(
        "Workflow: {:?} / cooldown: {}s",
        config.workflow,
        config.loop_config.cooldown
    );
    println!(
        "Started: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    let reclaimed = orphan_sweep(tracker.as_ref(), source);
    if reclaimed > 0 {
        println!("[{}] [sweep] reclaimed {reclaimed} orphaned issue(s)", timestamp());
    }

    let mut sessions: u64 = 0;
    let outcome = loop {
        if shutdown_requested() {
            break LoopOutcome::Completed;
        }

        let fetched = match &opts.issue_id {
            Some(id) => tracker.fetch_issue_by_id(id),
            None => tracker.fetch_next_issue(source),
        };

        let mut issue = match fetched {
            Ok(Some(issue)) => issue,
            Ok(None) => {
                println!("[{}] no work — queue is empty", timestamp());
                events.emit(LoopEvent::WorkEmpty);
                break LoopOutcome::Completed;
            }
            Err(e) => {
                eprintln!("[{}] fetch failed: {e}", timestamp());
                events.emit(LoopEvent::Error {
                    message: e.to_string(),
                });
                if opts.once {
                    break LoopOutcome::Completed;
                }
                cooldown_sleep(config.cooldown());
                continue;
            }
        };

        println!("[{}] picked up {}: {}", timestamp(), issue.id, issue.title);
        events.emit(LoopEvent::IssueQueued {
            issue_id: issue.id.clone(),
            title: issue.title.clone(),
        });

        if opts.dry_run {
            println!(
                "[{}] [dry-run] would move {} to '{}' and run a {:?} session",
                timestamp(),
                issue.id,
                source.in_progress,
                config.workflow
            );
            break LoopOutcome::Completed;
        }

        if let Err(e) = tracker.update_status(&issue.id, &source.in_progress) {
            eprintln!("[{}] cannot move {} to in-progress: {e}", timestamp(), issue.id);
            if opts.once {
                break LoopOutcome::Completed;
            }
            cooldown_sleep(config.cooldown());
            continue;
        }
        ctx.set_active(ActiveCleanup {
            issue_id: issue.id.clone(),
            previous_status: source.pick_from.clone(),
            tracker: Arc::clone(tracker),
        });
        events.emit(LoopEvent::IssueStarted {
            issue_id: issue.id.clone(),
            title: issue.title.clone(),
        });

        match session_fn(&mut issue) {
            Err(e) => {
                eprintln!("[{}] session for {} failed: {e}", timestamp(), issue.id);
                revert(tracker.as_ref(), ctx, events, &issue.id, source, e.to_string());
            }
            Ok(result) if !result.fallback.success => {
                if is_complete_provider_exhaustion(&result.fallback.attempts) {
                    eprintln!(
                        "[{}] every provider failed transiently for {}:",
                        timestamp(),
                        issue.id
                    );
                    for attempt in &result.fallback.attempts {
                        eprintln!(
                            "    {} — {}",
                            attempt.label(),
                            attempt.error.map(|e| e.as_str()).unwrap_or("ok")
                        );
                    }
                    eprintln!(
                        "[{}] stopping; {} stays in '{}' for the next run's sweep",
                        timestamp(),
                        issue.id,
                        source.in_progress
                    );
                    // Deliberately no rollback here.
                    ctx.clear_active();
                    events.emit(LoopEvent::WorkComplete);
                    return Ok(LoopOutcome::ProvidersExhausted);
                }
                revert(
                    tracker.as_ref(),
                    ctx,
                    events,
                    &issue.id,
                    source,
                    format!("task fault via {}", result.provider_used),
                );
            }
            Ok(result) if result.pr_urls.is_empty() => {
                // The agent claims success but delivered nothing reviewable.
                revert(
                    tracker.as_ref(),
                    ctx,
                    events,
                    &issue.id,
                    source,
                    "session produced no pull request".to_string(),
                );
            }
            Ok(result) => {
                for url in &result.pr_urls {
                    if let Err(e) = tracker.attach_pull_request(&issue.id, url) {
                        eprintln!("[{}] failed to attach PR to {}: {e}", timestamp(), issue.id);
                    }
                }
                // Keep the pickup label when the operator targeted this issue
                // explicitly, so it can be retriggered.
                let remove_label = if opts.issue_id.is_some() {
                    None
                } else {
                    source
                        .remove_label
                        .clone()
                        .or_else(|| source.label.first().map(str::to_string))
                };
                if let Err(e) =
                    tracker.complete_issue(&issue.id, &source.done, remove_label.as_deref())
                {
                    eprintln!("[{}] failed to complete {}: {e}", timestamp(), issue.id);
                }
                ctx.clear_active();
                println!(
                    "[{}] DONE {} via {} ({} PR(s))",
                    timestamp(),
                    issue.id,
                    result.provider_used,
                    result.pr_urls.len()
                );
                if config.bell {
                    print!("\x07");
                    let _ = std::io::stdout().flush();
                }
                events.emit(LoopEvent::IssueCompleted {
                    issue_id: issue.id.clone(),
                    pr_urls: result.pr_urls.clone(),
                });
            }
        }

        sessions += 1;
        if opts.once || opts.issue_id.is_some() {
            break LoopOutcome::Completed;
        }
        if max_sessions > 0 && sessions >= max_sessions {
            println!("[{}] session limit ({max_sessions}) reached", timestamp());
            break LoopOutcome::Completed;
        }
        cooldown_sleep(config.cooldown());
    };

    events.emit(LoopEvent::WorkComplete);
    Ok(outcome)
}

fn revert(
    tracker: &dyn Tracker,
    ctx: &ProcessContext,
    events: &EventSink,
    issue_id: &str,
    source: &SourceConfig,
    reason: String,
) {
    println!(
        "[{}] returning {} to '{}' ({reason})",
        timestamp(),
        issue_id,
        source.pick_from
    );
    if let Err(e) = tracker.update_status(issue_id, &source.pick_from) {
        eprintln!("[{}] rollback of {} failed: {e}", timestamp(), issue_id);
    }
    ctx.clear_active();
    events.emit(LoopEvent::IssueReverted {
        issue_id: issue_id.to_string(),
        reason,
    });
}

/// Sleep in short slices so a shutdown request cuts the cooldown short.
fn cooldown_sleep(duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if shutdown_requested() {
            return;
        }
        std::thread::sleep(Duration::from_millis(250));
    }
}

fn timestamp() -> String {
    chrono::Utc::now().format("%H:%M:%S").to_string()
}
