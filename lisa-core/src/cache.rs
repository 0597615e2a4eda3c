//! Per-project cache directory layout.
//!
//! Everything the loop and the agent exchange on disk lives under
//! `~/.lisa/cache/<project-slug>/`: the guardrails file, per-issue agent
//! logs, and the manifest/plan contract files. The slug is derived
//! deterministically from the project's working directory so two projects
//! never share state.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::worktree::slugify;

/// Return the base lisa data directory (`$LISA_DIR`, or `~/.lisa`).
pub fn default_lisa_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LISA_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".lisa");
    }
    PathBuf::from(".lisa")
}

/// Deterministic slug for a project root path.
fn project_slug(project_root: &Path) -> String {
    let absolute = fs::canonicalize(project_root).unwrap_or_else(|_| project_root.to_path_buf());
    let slug = slugify(&absolute.display().to_string());
    if slug.is_empty() {
        "root".to_string()
    } else {
        slug
    }
}

/// The cache directory for a project, created on first use.
pub fn project_cache_dir(lisa_dir: &Path, project_root: &Path) -> Result<PathBuf> {
    let dir = lisa_dir.join("cache").join(project_slug(project_root));
    fs::create_dir_all(dir.join("logs"))?;
    Ok(dir)
}

/// Path of the manifest the agent writes for one issue.
pub fn manifest_path(cache_dir: &Path, issue_id: &str) -> PathBuf {
    cache_dir.join(format!("manifest-{}.json", slugify(issue_id)))
}

/// Path of the plan the agent writes during a multi-repo planning phase.
pub fn plan_path(cache_dir: &Path, issue_id: &str) -> PathBuf {
    cache_dir.join(format!("plan-{}.json", slugify(issue_id)))
}

/// Path of the per-issue agent output log.
pub fn agent_log_path(cache_dir: &Path, issue_id: &str) -> PathBuf {
    cache_dir.join("logs").join(format!("{}.log", slugify(issue_id)))
}

/// Path of the rolling guardrails file.
pub fn guardrails_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join("guardrails.md")
}

/// Legacy in-project guardrails location, migrated on first use.
pub fn legacy_guardrails_path(project_root: &Path) -> PathBuf {
    project_root.join(".lisa").join("guardrails.md")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cache_dir_is_deterministic_per_project() {
        let lisa = TempDir::new().unwrap();
        let proj = TempDir::new().unwrap();
        let a = project_cache_dir(lisa.path(), proj.path()).unwrap();
        let b = project_cache_dir(lisa.path(), proj.path()).unwrap();
        assert_eq!(a, b);
        assert!(a.join("logs").is_dir());
    }

    #[test]
    fn cache_dirs_differ_across_projects() {
        let lisa = TempDir::new().unwrap();
        let p1 = TempDir::new().unwrap();
        let p2 = TempDir::new().unwrap();
        let a = project_cache_dir(lisa.path(), p1.path()).unwrap();
        let b = project_cache_dir(lisa.path(), p2.path()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn per_issue_paths_do_not_collide() {
        let dir = PathBuf::from("/tmp/cache");
        assert_ne!(
            manifest_path(&dir, "INT-100"),
            manifest_path(&dir, "INT-101")
        );
        assert_ne!(manifest_path(&dir, "INT-100"), plan_path(&dir, "INT-100"));
        assert_eq!(
            manifest_path(&dir, "INT-100"),
            PathBuf::from("/tmp/cache/manifest-int-100.json")
        );
    }
}
