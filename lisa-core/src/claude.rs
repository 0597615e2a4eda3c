//! Claude CLI agent binding.

use anyhow::Result;
use std::process::Command;

use crate::agent::{binary_available, run_supervised, Agent, AgentOutcome, AgentRunOptions};

/// Drives the `claude` CLI in non-interactive print mode.
pub struct ClaudeCliAgent;

impl Agent for ClaudeCliAgent {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn is_available(&self) -> bool {
        binary_available("claude")
    }

    fn run(&self, prompt: &str, opts: &AgentRunOptions) -> Result<AgentOutcome> {
        let mut cmd = Command::new("claude");
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("text")
            .arg("--dangerously-skip-permissions")
            .current_dir(&opts.cwd);
        if let Some(model) = &opts.model {
            cmd.arg("--model").arg(model);
        }
        run_supervised(cmd, opts)
    }
}
