//! Port for the PR platform, plus the `gh` CLI reference adapter.
//!
//! The adapter shells out to `gh` so lisa has no dependency on a GitHub API
//! crate and inherits the user's existing `gh auth` session.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::worktree::git_output;

/// Everything needed to open a PR.
#[derive(Debug, Clone)]
pub struct PullRequestSpec {
    /// Repo checkout the PR's head branch lives in.
    pub repo_path: PathBuf,
    pub owner: String,
    pub repo: String,
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// Identity of a repo checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub owner: String,
    pub repo: String,
    /// Currently checked-out branch.
    pub branch: String,
    pub default_branch: String,
}

/// Abstract contract every PR platform implements.
pub trait Platform: Send + Sync {
    /// Open a PR and return its URL.
    fn create_pull_request(&self, spec: &PullRequestSpec) -> Result<String>;

    /// URL of an open PR whose head is `branch`, if any.
    fn find_open_pr(&self, repo_path: &Path, branch: &str) -> Result<Option<String>>;

    /// Files changed between `base` and `head`.
    fn get_changed_files(&self, repo_path: &Path, base: &str, head: &str) -> Result<Vec<String>>;

    /// Identify the repo a checkout belongs to.
    fn get_repo_info(&self, cwd: &Path) -> Result<RepoInfo>;
}

/// Construct the configured platform binding.
///
/// The `gh` CLI adapter ships in-tree; the token/GitLab/Bitbucket HTTP
/// bindings live outside the core.
pub fn create_platform(name: &str) -> Result<Box<dyn Platform>> {
    match name {
        "cli" => Ok(Box::new(GhCliPlatform)),
        "token" | "gitlab" | "bitbucket" => {
            bail!("platform binding '{name}' is not bundled with the core")
        }
        other => bail!("unknown platform '{other}'"),
    }
}

/// Concrete adapter calling the `gh` CLI.
pub struct GhCliPlatform;

impl GhCliPlatform {
    /// Run a `gh` command in `cwd` and capture stdout as a trimmed String.
    fn gh_output(cwd: &Path, args: &[&str]) -> Result<String> {
        let out = Command::new("gh")
            .args(args)
            .current_dir(cwd)
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("failed to run: gh {}", args.join(" ")))?;
        if !out.status.success() {
            bail!(
                "gh {} exited with {}",
                args.join(" "),
                out.status.code().unwrap_or(-1)
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }
}

impl Platform for GhCliPlatform {
    fn create_pull_request(&self, spec: &PullRequestSpec) -> Result<String> {
        let repo_slug = format!("{}/{}", spec.owner, spec.repo);
        let out = Command::new("gh")
            .args([
                "pr",
                "create",
                "--repo",
                &repo_slug,
                "--head",
                &spec.head,
                "--base",
                &spec.base,
                "--title",
                &spec.title,
                "--body",
                &spec.body,
            ])
            .current_dir(&spec.repo_path)
            .output()
            .context("failed to run gh pr create")?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            bail!(
                "gh pr create failed for {}: {}",
                spec.head,
                stderr.trim()
            );
        }

        // gh prints the PR URL as the last stdout line.
        let stdout = String::from_utf8_lossy(&out.stdout);
        let url = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| l.starts_with("http"))
            .map(str::to_string);
        url.ok_or_else(|| anyhow::anyhow!("gh pr create produced no URL"))
    }

    fn find_open_pr(&self, repo_path: &Path, branch: &str) -> Result<Option<String>> {
        let out = Self::gh_output(
            repo_path,
            &[
                "pr", "list", "--head", branch, "--state", "open", "--json", "url", "-q",
                ".[0].url",
            ],
        )?;
        if out.is_empty() || out == "null" {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }

    fn get_changed_files(&self, repo_path: &Path, base: &str, head: &str) -> Result<Vec<String>> {
        let out = git_output(
            repo_path,
            &["diff", "--name-only", &format!("{base}...{head}")],
        )?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn get_repo_info(&self, cwd: &Path) -> Result<RepoInfo> {
        let json = Self::gh_output(
            cwd,
            &[
                "repo",
                "view",
                "--json",
                "owner,name,defaultBranchRef",
            ],
        )?;
        let v: serde_json::Value =
            serde_json::from_str(&json).context("unexpected gh repo view output")?;

        let owner = v["owner"]["login"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("gh repo view returned no owner"))?
            .to_string();
        let repo = v["name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("gh repo view returned no name"))?
            .to_string();
        let default_branch = v["defaultBranchRef"]["name"]
            .as_str()
            .unwrap_or("main")
            .to_string();
        let branch = git_output(cwd, &["rev-parse", "--abbrev-ref", "HEAD"])?;

        Ok(RepoInfo {
            owner,
            repo,
            branch,
            default_branch,
        })
    }
}
