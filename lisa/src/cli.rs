use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lisa_core::cache;
use lisa_core::config::LisaConfig;
use lisa_core::events::EventSink;
use lisa_core::guardrails::GuardrailsStore;
use lisa_core::loop_runner::{orphan_sweep, run_loop, LoopOptions, LoopOutcome};
use lisa_core::platform::create_platform;
use lisa_core::runner::DefaultAgentFactory;
use lisa_core::session::{run_session, SessionContext};
use lisa_core::shutdown::ProcessContext;
use lisa_core::tracker::create_tracker;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "lisa",
    version,
    about = "Autonomous issue-resolution loop",
    long_about = "lisa pulls issues from your tracker, hands each one to an AI coding agent in \
                  an isolated git checkout, and opens a pull request with the result.",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the issue-resolution loop
    Run {
        /// Process one session and exit
        #[arg(long)]
        once: bool,

        /// Max sessions this run (0 = unbounded)
        #[arg(long, default_value_t = 0)]
        limit: u64,

        /// Log intent without side effects
        #[arg(long)]
        dry_run: bool,

        /// Run one explicit issue (id or URL) instead of the queue
        #[arg(long)]
        issue: Option<String>,

        /// Project root holding .lisa/config.yaml
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },

    /// Reclaim issues stranded in the in-progress state, then exit
    Orphans {
        /// Project root holding .lisa/config.yaml
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },

    /// Print version
    Version,
}

/// Execute a parsed command. Returns the process exit code.
pub fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Version => {
            println!("lisa {VERSION}");
            Ok(0)
        }
        Commands::Orphans { project } => {
            let config = match LisaConfig::load(&project) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("lisa: {e:#}");
                    return Ok(1);
                }
            };
            let tracker = match create_tracker(&config) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("lisa: {e:#}");
                    return Ok(1);
                }
            };
            let reclaimed = orphan_sweep(tracker.as_ref(), &config.source_config);
            println!("reclaimed {reclaimed} orphaned issue(s)");
            Ok(0)
        }
        Commands::Run {
            once,
            limit,
            dry_run,
            issue,
            project,
        } => run_command(once, limit, dry_run, issue, project),
    }
}

fn run_command(
    once: bool,
    limit: u64,
    dry_run: bool,
    issue: Option<String>,
    project: PathBuf,
) -> Result<i32> {
    let config = match LisaConfig::load(&project) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("lisa: {e:#}");
            return Ok(1);
        }
    };
    let tracker = match create_tracker(&config) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("lisa: {e:#}");
            return Ok(1);
        }
    };
    let platform = match create_platform(&config.platform) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("lisa: {e:#}");
            return Ok(1);
        }
    };

    let lisa_dir = cache::default_lisa_dir();
    let cache_dir = cache::project_cache_dir(&lisa_dir, &project)?;
    let guardrails = GuardrailsStore::open(&cache_dir, &project);
    let events = EventSink::new(&cache_dir.join("logs"));
    let agents = DefaultAgentFactory;

    // Signal handlers must be in place before the first tracker call.
    let ctx = ProcessContext::install();

    let opts = LoopOptions {
        once,
        limit,
        dry_run,
        issue_id: issue,
    };
    let session_ctx = SessionContext {
        config: &config,
        platform: platform.as_ref(),
        agents: &agents,
        guardrails: &guardrails,
        cache_dir: &cache_dir,
        project_root: &project,
        echo_output: true,
    };

    let outcome = run_loop(&config, &tracker, &ctx, &events, &opts, |issue| {
        run_session(&session_ctx, issue)
    })?;

    if outcome == LoopOutcome::ProvidersExhausted {
        println!("providers exhausted — run again once capacity recovers");
    }
    Ok(0)
}
