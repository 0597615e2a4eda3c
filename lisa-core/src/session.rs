//! One session: resolve one issue end-to-end.
//!
//! A session prepares a checkout (worktree or in-place), hands the prompt to
//! the fallback chain, reads the agent-authored manifest, pushes the branch,
//! and opens a PR. Worktrees are removed on every exit path. Errors returned
//! from here are preparation/push failures; the loop catches them, rolls the
//! issue back, and keeps going.

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::agent::AgentRunOptions;
use crate::cache;
use crate::config::{LisaConfig, Workflow};
use crate::deps::resolve_dependency;
use crate::fallback::{FallbackResult, ModelSpec};
use crate::guardrails::GuardrailsStore;
use crate::issue::Issue;
use crate::manifest::{self, Manifest};
use crate::overseer::OverseerConfig;
use crate::platform::{Platform, PullRequestSpec};
use crate::prompt::{
    build_planning_prompt, build_push_recovery_prompt, build_step_prompt, build_task_prompt,
    CheckoutMode, StepOutcome,
};
use crate::runner::{primary_supports_native_worktree, run_with_fallback, AgentFactory};
use crate::worktree::{
    create_worktree, determine_repo_path, generate_branch_name, git_capture, remove_worktree,
};

/// Hook-failure pushes are retried with agent recovery at most this often.
pub const MAX_PUSH_RETRIES: u32 = 2;

/// Outcome of one session.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub success: bool,
    pub provider_used: String,
    /// Success with no PRs is a distinct outcome: the loop rolls back.
    pub pr_urls: Vec<String>,
    pub fallback: FallbackResult,
}

impl SessionResult {
    fn failed(fallback: FallbackResult) -> Self {
        Self {
            success: false,
            provider_used: fallback.provider_used.clone(),
            pr_urls: Vec::new(),
            fallback,
        }
    }
}

/// Everything a session borrows from the process.
pub struct SessionContext<'a> {
    pub config: &'a LisaConfig,
    pub platform: &'a dyn Platform,
    pub agents: &'a dyn AgentFactory,
    pub guardrails: &'a GuardrailsStore,
    pub cache_dir: &'a Path,
    pub project_root: &'a Path,
    /// Echo agent output to the terminal (off under a TUI).
    pub echo_output: bool,
}

impl SessionContext<'_> {
    fn agent_opts(&self, issue_id: &str, cwd: PathBuf, native_worktree: bool) -> AgentRunOptions {
        AgentRunOptions {
            cwd,
            log_file: cache::agent_log_path(self.cache_dir, issue_id),
            issue_id: issue_id.to_string(),
            model: None,
            overseer: overseer_config(self.config),
            native_worktree,
            echo_output: self.echo_output,
        }
    }
}

fn overseer_config(config: &LisaConfig) -> OverseerConfig {
    config.overseer.to_overseer_config()
}

/// Removes a pre-created worktree on every exit path of a session.
struct WorktreeGuard {
    repo_root: PathBuf,
    path: PathBuf,
    branch: String,
}

impl Drop for WorktreeGuard {
    fn drop(&mut self) {
        remove_worktree(&self.repo_root, &self.path, &self.branch);
    }
}

/// Run one session for `issue` according to the configured workflow.
pub fn run_session(ctx: &SessionContext, issue: &mut Issue) -> Result<SessionResult> {
    match ctx.config.workflow {
        Workflow::Worktree if ctx.config.repos.len() > 1 => run_worktree_multi(ctx, issue),
        Workflow::Worktree => run_worktree_single(ctx, issue),
        Workflow::Branch => run_branch_mode(ctx, issue),
    }
}

// ── Worktree mode, single repo ────────────────────────────────────────────────

fn run_worktree_single(ctx: &SessionContext, issue: &mut Issue) -> Result<SessionResult> {
    let specs = ctx.config.model_specs();
    let repo = determine_repo_path(&ctx.config.repos, issue)?;
    let base = ctx.config.repo_base(repo).to_string();

    if issue.dependency.is_none() && !issue.blocked_by.is_empty() {
        issue.dependency = resolve_dependency(issue, &repo.path, &base, ctx.platform);
        if let Some(dep) = &issue.dependency {
            println!(
                "[{}] stacking on blocker {} (branch {})",
                issue.id, dep.blocker_id, dep.branch
            );
        }
    }

    let branch = generate_branch_name(&issue.id, &issue.title);
    let native = primary_supports_native_worktree(ctx.agents, &specs);

    let (cwd, _guard, mode) = if native {
        (repo.path.clone(), None, CheckoutMode::Native)
    } else {
        let path = create_worktree(&repo.path, &branch, &base)?;
        let guard = WorktreeGuard {
            repo_root: repo.path.clone(),
            path: path.clone(),
            branch: branch.clone(),
        };
        (path, Some(guard), CheckoutMode::Isolated)
    };

    let manifest_path = cache::manifest_path(ctx.cache_dir, &issue.id);
    manifest::remove_stale(&manifest_path);

    let prompt = build_task_prompt(issue, &branch, &base, &manifest_path, mode);
    let opts = ctx.agent_opts(&issue.id, cwd.clone(), native);

    let fallback = run_with_fallback(ctx.agents, &specs, &prompt, &opts, ctx.guardrails);
    if !fallback.success {
        return Ok(SessionResult::failed(fallback));
    }

    let manifest = manifest::read_manifest(&manifest_path)?
        .ok_or_else(|| anyhow!("agent exited without writing a manifest for {}", issue.id))?;

    let pr_urls = match &manifest.pr_url {
        // The agent already opened the PR; nothing left to push.
        Some(url) => vec![url.clone()],
        None => {
            let push_dir = manifest.repo_path.clone().unwrap_or_else(|| cwd.clone());
            push_with_recovery(ctx, &push_dir, &manifest.branch, &specs, &opts)?;
            let pr_base = issue
                .dependency
                .as_ref()
                .map(|d| d.branch.clone())
                .unwrap_or_else(|| base.clone());
            vec![open_pull_request(ctx, &push_dir, issue, &manifest, &pr_base)?]
        }
    };

    Ok(SessionResult {
        success: true,
        provider_used: fallback.provider_used.clone(),
        pr_urls,
        fallback,
    })
}

// ── Worktree mode, multi-repo planning ───────────────────────────────────────

fn run_worktree_multi(ctx: &SessionContext, issue: &mut Issue) -> Result<SessionResult> {
    let specs = ctx.config.model_specs();

    let plan_path = cache::plan_path(ctx.cache_dir, &issue.id);
    manifest::remove_stale(&plan_path);

    let repo_list: Vec<(String, &Path)> = ctx
        .config
        .repos
        .iter()
        .map(|r| (r.name.clone(), r.path.as_path()))
        .collect();
    let planning_prompt = build_planning_prompt(issue, &repo_list, &plan_path);
    let planning_opts = ctx.agent_opts(&issue.id, ctx.project_root.to_path_buf(), false);

    let planning = run_with_fallback(ctx.agents, &specs, &planning_prompt, &planning_opts, ctx.guardrails);
    if !planning.success {
        return Ok(SessionResult::failed(planning));
    }

    let plan = manifest::read_plan(&plan_path)?
        .ok_or_else(|| anyhow!("agent exited without writing a plan for {}", issue.id))?;
    let steps = plan.validated_steps(&ctx.config.repos)?;
    println!("[{}] plan: {} step(s)", issue.id, steps.len());

    let mut outcomes: Vec<StepOutcome> = Vec::new();
    let mut pr_urls: Vec<String> = Vec::new();
    let mut last_fallback = planning;

    for (index, step) in steps.iter().enumerate() {
        let repo = ctx
            .config
            .repos
            .iter()
            .find(|r| manifest::paths_match(&r.path, &step.repo_path))
            .ok_or_else(|| anyhow!("plan step repo vanished: {}", step.repo_path.display()))?;
        let base = ctx.config.repo_base(repo).to_string();
        let branch = generate_branch_name(&issue.id, &step.scope);
        let is_last = index + 1 == steps.len();

        println!(
            "[{}] step {}/{}: {}",
            issue.id,
            index + 1,
            steps.len(),
            repo.name
        );

        let path = create_worktree(&repo.path, &branch, &base)?;
        let _guard = WorktreeGuard {
            repo_root: repo.path.clone(),
            path: path.clone(),
            branch: branch.clone(),
        };

        let manifest_path = cache::manifest_path(ctx.cache_dir, &issue.id);
        manifest::remove_stale(&manifest_path);

        let step_prompt =
            build_step_prompt(issue, step, &branch, &outcomes, &manifest_path, is_last);
        let opts = ctx.agent_opts(&issue.id, path.clone(), false);

        let fallback = run_with_fallback(ctx.agents, &specs, &step_prompt, &opts, ctx.guardrails);
        if !fallback.success {
            return Ok(SessionResult::failed(fallback));
        }
        last_fallback = fallback;

        let step_manifest = manifest::read_manifest(&manifest_path)?.ok_or_else(|| {
            anyhow!(
                "step {} for {} produced no manifest",
                index + 1,
                issue.id
            )
        })?;

        let url = match &step_manifest.pr_url {
            Some(url) => url.clone(),
            None => {
                let push_dir = step_manifest
                    .repo_path
                    .clone()
                    .unwrap_or_else(|| path.clone());
                push_with_recovery(ctx, &push_dir, &step_manifest.branch, &specs, &opts)?;
                open_pull_request(ctx, &push_dir, issue, &step_manifest, &base)?
            }
        };

        pr_urls.push(url.clone());
        outcomes.push(StepOutcome {
            repo_path: repo.path.clone(),
            branch: step_manifest.branch.clone(),
            pr_url: url,
        });
    }

    Ok(SessionResult {
        success: true,
        provider_used: last_fallback.provider_used.clone(),
        pr_urls,
        fallback: last_fallback,
    })
}

// ── Branch mode ───────────────────────────────────────────────────────────────

fn run_branch_mode(ctx: &SessionContext, issue: &mut Issue) -> Result<SessionResult> {
    let specs = ctx.config.model_specs();
    let repo = determine_repo_path(&ctx.config.repos, issue)?;
    let base = ctx.config.repo_base(repo).to_string();

    if issue.dependency.is_none() && !issue.blocked_by.is_empty() {
        issue.dependency = resolve_dependency(issue, &repo.path, &base, ctx.platform);
    }

    let branch = generate_branch_name(&issue.id, &issue.title);
    let manifest_path = cache::manifest_path(ctx.cache_dir, &issue.id);
    manifest::remove_stale(&manifest_path);

    let prompt = build_task_prompt(issue, &branch, &base, &manifest_path, CheckoutMode::InPlace);
    let opts = ctx.agent_opts(&issue.id, repo.path.clone(), false);

    let fallback = run_with_fallback(ctx.agents, &specs, &prompt, &opts, ctx.guardrails);
    if !fallback.success {
        return Ok(SessionResult::failed(fallback));
    }

    // Without a manifest, fall back to scanning for branches the agent made.
    let candidates: Vec<(PathBuf, Manifest)> = match manifest::read_manifest(&manifest_path)? {
        Some(m) => {
            let dir = m.repo_path.clone().unwrap_or_else(|| repo.path.clone());
            vec![(dir, m)]
        }
        None => crate::worktree::detect_feature_branches(
            &ctx.config.repos,
            &issue.id,
            &ctx.config.base_branch,
        )
        .into_iter()
        .map(|(path, branch)| {
            (
                path,
                Manifest {
                    branch,
                    repo_path: None,
                    pr_url: None,
                    pr_title: None,
                    pr_body: None,
                },
            )
        })
        .collect(),
    };

    let mut pr_urls = Vec::new();
    for (repo_path, m) in &candidates {
        let url = match &m.pr_url {
            Some(url) => url.clone(),
            None => {
                let repo_base = ctx
                    .config
                    .repos
                    .iter()
                    .find(|r| manifest::paths_match(&r.path, repo_path))
                    .map(|r| ctx.config.repo_base(r).to_string())
                    .unwrap_or_else(|| ctx.config.base_branch.clone());
                let pr_base = issue
                    .dependency
                    .as_ref()
                    .filter(|_| manifest::paths_match(repo_path, &repo.path))
                    .map(|d| d.branch.clone())
                    .unwrap_or(repo_base);
                push_with_recovery(ctx, repo_path, &m.branch, &specs, &opts)?;
                open_pull_request(ctx, repo_path, issue, m, &pr_base)?
            }
        };
        pr_urls.push(url);
    }

    Ok(SessionResult {
        success: true,
        provider_used: fallback.provider_used.clone(),
        pr_urls,
        fallback,
    })
}

// ── Push with recovery ────────────────────────────────────────────────────────

/// Push failures that no agent can fix: credentials and the network.
const FATAL_PUSH_PATTERNS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "access denied",
    "403",
    "could not read from remote",
    "could not resolve host",
    "connection refused",
    "connection reset",
    "network is unreachable",
    "repository not found",
];

/// True when a failed push looks like a pre-push hook rejection that the
/// agent could fix, rather than a credentials/network problem.
pub fn is_recoverable_push_failure(output: &str) -> bool {
    let lower = output.to_lowercase();
    !FATAL_PUSH_PATTERNS.iter().any(|p| lower.contains(p))
}

/// `git push -u origin <branch>`, re-invoking the agent on hook failures.
///
/// Three consecutive hook failures mean exactly [`MAX_PUSH_RETRIES`] agent
/// re-invocations before the session fails.
fn push_with_recovery(
    ctx: &SessionContext,
    cwd: &Path,
    branch: &str,
    specs: &[ModelSpec],
    opts: &AgentRunOptions,
) -> Result<()> {
    let mut recoveries: u32 = 0;
    loop {
        match git_capture(cwd, &["push", "-u", "origin", branch]) {
            Ok(_) => return Ok(()),
            Err(output) => {
                if !is_recoverable_push_failure(&output) {
                    bail!("push of {branch} failed: {}", output.trim());
                }
                if recoveries >= MAX_PUSH_RETRIES {
                    bail!(
                        "push of {branch} still failing after {MAX_PUSH_RETRIES} recovery attempts"
                    );
                }
                recoveries += 1;
                println!(
                    "[push] hook rejected {branch}; asking the agent to fix it (attempt {recoveries}/{MAX_PUSH_RETRIES})"
                );
                let recovery_prompt = build_push_recovery_prompt(branch, &output);
                let fallback =
                    run_with_fallback(ctx.agents, specs, &recovery_prompt, opts, ctx.guardrails);
                if !fallback.success {
                    bail!("push recovery agent failed for {branch}");
                }
            }
        }
    }
}

// ── PR creation ───────────────────────────────────────────────────────────────

fn open_pull_request(
    ctx: &SessionContext,
    push_dir: &Path,
    issue: &Issue,
    m: &Manifest,
    base: &str,
) -> Result<String> {
    let info = ctx
        .platform
        .get_repo_info(push_dir)
        .with_context(|| format!("cannot identify repo at {}", push_dir.display()))?;

    let title = m.pr_title.clone().unwrap_or_else(|| issue.title.clone());
    let body = m.pr_body.clone().unwrap_or_else(|| default_pr_body(issue));

    let url = ctx.platform.create_pull_request(&PullRequestSpec {
        repo_path: push_dir.to_path_buf(),
        owner: info.owner,
        repo: info.repo,
        head: m.branch.clone(),
        base: base.to_string(),
        title,
        body,
    })?;
    println!("[{}] opened PR: {url}", issue.id);
    Ok(url)
}

fn default_pr_body(issue: &Issue) -> String {
    let mut body = format!("Resolves {}: {}", issue.id, issue.title);
    if !issue.url.is_empty() {
        body.push_str(&format!("\n\n{}", issue.url));
    }
    body
}
