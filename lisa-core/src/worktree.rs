//! Isolated git worktrees, branch naming, and branch detection.
//!
//! Worktrees live under `<repo>/.worktrees/<branch>`, one per session. All
//! git access goes through the `git` CLI so lisa inherits the user's existing
//! git configuration and credentials.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::RepoConfig;
use crate::issue::Issue;

/// Run a git command in `repo` and capture stdout as a trimmed String.
pub(crate) fn git_output(repo: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(repo)
        .stderr(Stdio::null())
        .output()
        .with_context(|| format!("failed to run: git {}", args.join(" ")))?;
    if !out.status.success() {
        bail!(
            "git {} exited with {}",
            args.join(" "),
            out.status.code().unwrap_or(-1)
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Run a git command in `repo` and return true if it succeeded.
pub(crate) fn git_ok(repo: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(repo)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run a git command in `repo`, capturing combined stdout/stderr, and return
/// `Err(output)` on non-zero exit. Used where the error text matters (push).
pub(crate) fn git_capture(repo: &Path, args: &[&str]) -> std::result::Result<String, String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(|e| format!("failed to run git {}: {e}", args.join(" ")))?;
    let mut text = String::from_utf8_lossy(&out.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&out.stderr));
    if out.status.success() {
        Ok(text)
    } else {
        Err(text)
    }
}

/// Convert text to a branch-safe slug (lowercase ASCII, hyphens only).
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut slug = String::new();
    let mut prev_hyphen = false;

    for c in lower.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            prev_hyphen = false;
        } else if !prev_hyphen {
            slug.push('-');
            prev_hyphen = true;
        }
    }

    slug.trim_matches('-').to_string()
}

/// Deterministic branch name for an issue: `feat/<id>-<title-slug>`,
/// lowercase, ASCII-only, slug capped at 50 characters.
pub fn generate_branch_name(issue_id: &str, title: &str) -> String {
    let id_slug = slugify(issue_id);
    let title_slug: String = slugify(title).chars().take(50).collect();
    let title_slug = title_slug.trim_end_matches('-');
    if title_slug.is_empty() {
        format!("feat/{id_slug}")
    } else {
        format!("feat/{id_slug}-{title_slug}")
    }
}

/// Directory name for a worktree: the branch with path separators flattened.
fn worktree_dir_name(branch: &str) -> String {
    branch.replace('/', "-")
}

/// Ensure `.worktrees/` is listed in the repo's `.gitignore`.
///
/// Idempotent: appends only when no existing line already covers it.
fn ensure_worktrees_ignored(repo_root: &Path) -> Result<()> {
    let gitignore = repo_root.join(".gitignore");
    let existing = fs::read_to_string(&gitignore).unwrap_or_default();
    let covered = existing
        .lines()
        .map(str::trim)
        .any(|l| l == ".worktrees" || l == ".worktrees/" || l == "/.worktrees" || l == "/.worktrees/");
    if covered {
        return Ok(());
    }

    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&gitignore)
        .with_context(|| format!("failed to open {}", gitignore.display()))?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(f)?;
    }
    writeln!(f, ".worktrees/")?;
    Ok(())
}

/// Create a worktree for `branch` under `<repo_root>/.worktrees/`, branching
/// off `base_branch`. Returns the absolute worktree path.
///
/// Failure (e.g. the branch already exists) is fatal to the session but not
/// to the loop.
pub fn create_worktree(repo_root: &Path, branch: &str, base_branch: &str) -> Result<PathBuf> {
    ensure_worktrees_ignored(repo_root)?;

    let worktrees_dir = repo_root.join(".worktrees");
    fs::create_dir_all(&worktrees_dir)?;
    let path = worktrees_dir.join(worktree_dir_name(branch));

    let path_str = path.display().to_string();
    git_capture(
        repo_root,
        &["worktree", "add", "-b", branch, &path_str, base_branch],
    )
    .map_err(|out| {
        anyhow::anyhow!(
            "failed to create worktree for {branch}: {}",
            out.trim()
        )
    })?;

    Ok(fs::canonicalize(&path).unwrap_or(path))
}

/// Best-effort worktree cleanup: remove the checkout, prune metadata, and
/// delete the branch. Never fails the session.
pub fn remove_worktree(repo_root: &Path, path: &Path, branch: &str) {
    let path_str = path.display().to_string();
    if !git_ok(repo_root, &["worktree", "remove", "--force", &path_str]) {
        // The checkout may be half-gone already; make sure the directory is.
        let _ = fs::remove_dir_all(path);
        let _ = git_ok(repo_root, &["worktree", "prune"]);
    }
    let _ = git_ok(repo_root, &["branch", "-D", branch]);
}

/// List local branch names in `repo`.
fn list_branches(repo: &Path) -> Vec<String> {
    git_output(
        repo,
        &["for-each-ref", "refs/heads", "--format", "%(refname:short)"],
    )
    .map(|out| {
        out.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Find a local branch whose name contains `issue_id` (case-insensitive).
pub fn find_branch_by_issue_id(repo: &Path, issue_id: &str) -> Result<Option<String>> {
    let needle = issue_id.to_lowercase();
    Ok(list_branches(repo)
        .into_iter()
        .find(|b| b.to_lowercase().contains(&needle)))
}

/// Three-pass scan for branches an agent created while working on `issue_id`.
///
/// Per repo: (1) any branch whose name contains the issue id; (2) failing
/// that, any non-base branch with commits ahead of base; (3) failing that, a
/// history search for commits mentioning the issue id. Returns
/// `(repo_path, branch)` pairs; all detected branches are PR candidates.
pub fn detect_feature_branches(
    repos: &[RepoConfig],
    issue_id: &str,
    default_base: &str,
) -> Vec<(PathBuf, String)> {
    let needle = issue_id.to_lowercase();
    let mut found = Vec::new();

    for repo in repos {
        let base = repo.base_branch.as_deref().unwrap_or(default_base);
        let branches = list_branches(&repo.path);

        // Pass 1: branch name contains the issue id.
        let mut hits: Vec<String> = branches
            .iter()
            .filter(|b| b.to_lowercase().contains(&needle))
            .cloned()
            .collect();

        // Pass 2: non-base branches with commits ahead of base.
        if hits.is_empty() {
            hits = branches
                .iter()
                .filter(|b| b.as_str() != base)
                .filter(|b| {
                    git_output(&repo.path, &["rev-list", "--count", &format!("{base}..{b}")])
                        .ok()
                        .and_then(|n| n.parse::<u64>().ok())
                        .is_some_and(|n| n > 0)
                })
                .cloned()
                .collect();
        }

        // Pass 3: history search for commits mentioning the issue id.
        if hits.is_empty() {
            if let Ok(sha) = git_output(
                &repo.path,
                &["log", "--all", "-i", "--grep", issue_id, "--format=%H", "-n", "1"],
            ) {
                if !sha.is_empty() {
                    if let Ok(out) = git_output(
                        &repo.path,
                        &["branch", "--contains", &sha, "--format", "%(refname:short)"],
                    ) {
                        hits = out
                            .lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty() && *l != base)
                            .map(str::to_string)
                            .collect();
                    }
                }
            }
        }

        for branch in hits {
            found.push((repo.path.clone(), branch));
        }
    }

    found
}

/// Route an issue to a configured repo.
///
/// Order: (a) the issue's explicit `repo` field (matched against repo name),
/// (b) a `match` prefix on the issue title, (c) the first configured repo.
pub fn determine_repo_path<'a>(repos: &'a [RepoConfig], issue: &Issue) -> Result<&'a RepoConfig> {
    if repos.is_empty() {
        bail!("no repos configured");
    }

    if let Some(name) = &issue.repo {
        if let Some(repo) = repos.iter().find(|r| &r.name == name) {
            return Ok(repo);
        }
    }

    let title_lower = issue.title.to_lowercase();
    for repo in repos {
        if let Some(prefix) = &repo.match_prefix {
            if title_lower.starts_with(&prefix.to_lowercase()) {
                return Ok(repo);
            }
        }
    }

    Ok(&repos[0])
}
