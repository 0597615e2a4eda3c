//! Port for the AI coding agent, plus the shared child-process supervisor.
//!
//! An agent invocation blocks until the child exits, the 30-minute ceiling
//! expires, or the overseer kills it for a stagnant working tree. Combined
//! stdout/stderr streams to the per-issue log file (and the terminal, unless
//! suppressed) while being captured for the eligibility classifier.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Write as IoWrite};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::overseer::{self, OverseerConfig, OVERSEER_SENTINEL};

/// Hard ceiling on one agent invocation.
pub const AGENT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Options for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRunOptions {
    pub cwd: PathBuf,
    /// Combined-output log file.
    pub log_file: PathBuf,
    pub issue_id: String,
    /// Model override for this attempt.
    pub model: Option<String>,
    pub overseer: OverseerConfig,
    /// True when the agent creates its own worktree.
    pub native_worktree: bool,
    /// Echo agent output to the terminal (off under a TUI).
    pub echo_output: bool,
}

impl AgentRunOptions {
    pub fn with_model(&self, model: Option<String>) -> Self {
        let mut opts = self.clone();
        opts.model = model;
        opts
    }
}

/// Result of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    /// Combined stdout/stderr, augmented with [`OVERSEER_SENTINEL`] when the
    /// overseer killed the agent.
    pub output: String,
    pub duration: Duration,
}

/// Abstract contract every agent binding implements.
pub trait Agent {
    /// Stable identifier used in attempts and attribution.
    fn name(&self) -> &'static str;

    /// True when the agent manages its own worktrees; the session then skips
    /// pre-creating one.
    fn supports_native_worktree(&self) -> bool {
        false
    }

    /// Cheap availability probe (e.g. `<binary> --version`).
    fn is_available(&self) -> bool;

    /// Run the agent to completion.
    fn run(&self, prompt: &str, opts: &AgentRunOptions) -> Result<AgentOutcome>;
}

/// Construct an agent binding by provider name.
///
/// The Claude CLI binding ships in-tree; other providers live outside the
/// core.
pub fn create_agent(provider: &str) -> Result<Box<dyn Agent>> {
    match provider {
        "claude" => Ok(Box::new(crate::claude::ClaudeCliAgent)),
        other => anyhow::bail!("no agent binding for provider '{other}'"),
    }
}

/// Probe whether `binary --version` runs successfully.
pub fn binary_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Run a prepared command under supervision.
///
/// Shared by agent bindings: wires up output streaming, the overseer, and
/// the invocation timeout. The command's stdout/stderr are taken over.
pub fn run_supervised(mut cmd: Command, opts: &AgentRunOptions) -> Result<AgentOutcome> {
    let start = Instant::now();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("failed to spawn agent process")?;

    let log = File::create(&opts.log_file)
        .with_context(|| format!("failed to create log {}", opts.log_file.display()))?;
    let sink = Arc::new(Mutex::new(OutputSink {
        log,
        captured: String::new(),
        echo: opts.echo_output,
    }));

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let sink = Arc::clone(&sink);
        readers.push(std::thread::spawn(move || stream_lines(stdout, &sink)));
    }
    if let Some(stderr) = child.stderr.take() {
        let sink = Arc::clone(&sink);
        readers.push(std::thread::spawn(move || stream_lines(stderr, &sink)));
    }

    let mut watchdog = if opts.overseer.enabled {
        Some(overseer::start(child.id(), &opts.cwd, &opts.overseer))
    } else {
        None
    };

    let (status, timed_out) = wait_with_timeout(&mut child, AGENT_TIMEOUT)?;

    if let Some(w) = watchdog.as_mut() {
        w.stop();
    }
    for r in readers {
        let _ = r.join();
    }

    let was_killed = watchdog.as_ref().is_some_and(|w| w.was_killed());
    let mut output = {
        let sink = sink.lock().unwrap_or_else(|p| p.into_inner());
        sink.captured.clone()
    };
    if was_killed {
        output.push('\n');
        output.push_str(OVERSEER_SENTINEL);
    }
    if timed_out {
        output.push_str("\nagent invocation exceeded the 30-minute timeout\n");
    }

    let success = status.map(|s| s.success()).unwrap_or(false) && !was_killed && !timed_out;
    Ok(AgentOutcome {
        success,
        output,
        duration: start.elapsed(),
    })
}

struct OutputSink {
    log: File,
    captured: String,
    echo: bool,
}

fn stream_lines(reader: impl std::io::Read, sink: &Mutex<OutputSink>) {
    let buf = BufReader::new(reader);
    for line in buf.lines() {
        let Ok(line) = line else { break };
        let mut sink = match sink.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        let _ = writeln!(sink.log, "{line}");
        if sink.echo {
            println!("{line}");
        }
        sink.captured.push_str(&line);
        sink.captured.push('\n');
    }
}

/// Wait for the child, enforcing `timeout`. Returns the exit status (None if
/// the child had to be killed for timing out) and whether it timed out.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> Result<(Option<std::process::ExitStatus>, bool)> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().context("failed to poll agent process")? {
            return Ok((Some(status), false));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok((None, true));
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}
