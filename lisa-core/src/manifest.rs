//! Contract files the agent writes before exiting.
//!
//! The manifest tells the loop which branch to push and, optionally, which
//! PR the agent already opened. The plan drives the multi-repo planning
//! phase. Both live at per-issue paths inside the cache directory and are
//! read only after the agent has exited.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::RepoConfig;

/// Written by the agent into `manifest-<issueId>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Branch carrying the agent's work. Required.
    pub branch: String,
    /// Absolute repo path the branch lives in, when not the session cwd.
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
    /// Set when the agent already opened the PR itself.
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub pr_title: Option<String>,
    #[serde(default)]
    pub pr_body: Option<String>,
}

/// One step of a multi-repo plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub repo_path: PathBuf,
    /// One-paragraph scope description.
    pub scope: String,
    /// Execution order, ascending.
    pub order: i64,
}

/// Written by the agent into `plan-<issueId>.json` during the planning phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Validate against the configured repos and return the steps in
    /// execution order.
    pub fn validated_steps(&self, repos: &[RepoConfig]) -> Result<Vec<PlanStep>> {
        if self.steps.is_empty() {
            bail!("plan contains no steps");
        }
        for step in &self.steps {
            let known = repos.iter().any(|r| paths_match(&r.path, &step.repo_path));
            if !known {
                bail!(
                    "plan step references unconfigured repo: {}",
                    step.repo_path.display()
                );
            }
            if step.scope.trim().is_empty() {
                bail!("plan step for {} has an empty scope", step.repo_path.display());
            }
        }
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.order);
        Ok(steps)
    }
}

pub(crate) fn paths_match(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

/// Read a manifest. `Ok(None)` when the file is absent; an error when it is
/// present but unusable (the agent wrote garbage or no branch).
pub fn read_manifest(path: &Path) -> Result<Option<Manifest>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    let manifest: Manifest = serde_json::from_str(&content)
        .with_context(|| format!("invalid manifest: {}", path.display()))?;
    if manifest.branch.trim().is_empty() {
        bail!("manifest {} has an empty branch", path.display());
    }
    Ok(Some(manifest))
}

/// Read a plan. Same absence semantics as [`read_manifest`].
pub fn read_plan(path: &Path) -> Result<Option<Plan>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    let plan: Plan = serde_json::from_str(&content)
        .with_context(|| format!("invalid plan: {}", path.display()))?;
    Ok(Some(plan))
}

/// Delete a stale contract file left by an earlier session for the same
/// issue. A session must only ever read what its own agent wrote.
pub fn remove_stale(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo(path: &str) -> RepoConfig {
        RepoConfig {
            name: path.rsplit('/').next().unwrap_or("r").to_string(),
            path: PathBuf::from(path),
            match_prefix: None,
            base_branch: None,
        }
    }

    #[test]
    fn manifest_round_trips_camel_case() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest-int-100.json");
        fs::write(
            &path,
            r#"{"branch":"feat/int-100-add-logging","prUrl":"https://github.com/a/b/pull/7"}"#,
        )
        .unwrap();

        let m = read_manifest(&path).unwrap().unwrap();
        assert_eq!(m.branch, "feat/int-100-add-logging");
        assert_eq!(m.pr_url.as_deref(), Some("https://github.com/a/b/pull/7"));
        assert_eq!(m.repo_path, None);
    }

    #[test]
    fn absent_manifest_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_manifest(&dir.path().join("nope.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn empty_branch_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.json");
        fs::write(&path, r#"{"branch":""}"#).unwrap();
        assert!(read_manifest(&path).is_err());
    }

    #[test]
    fn garbage_manifest_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.json");
        fs::write(&path, "not json").unwrap();
        assert!(read_manifest(&path).is_err());
    }

    #[test]
    fn plan_steps_sorted_by_order() {
        let plan = Plan {
            steps: vec![
                PlanStep {
                    repo_path: PathBuf::from("/srv/web"),
                    scope: "consume endpoint".to_string(),
                    order: 2,
                },
                PlanStep {
                    repo_path: PathBuf::from("/srv/api"),
                    scope: "add endpoint".to_string(),
                    order: 1,
                },
            ],
        };
        let repos = vec![repo("/srv/api"), repo("/srv/web")];
        let steps = plan.validated_steps(&repos).unwrap();
        assert_eq!(steps[0].scope, "add endpoint");
        assert_eq!(steps[1].scope, "consume endpoint");
    }

    #[test]
    fn plan_rejects_unknown_repo() {
        let plan = Plan {
            steps: vec![PlanStep {
                repo_path: PathBuf::from("/srv/other"),
                scope: "x".to_string(),
                order: 1,
            }],
        };
        let repos = vec![repo("/srv/api")];
        assert!(plan.validated_steps(&repos).is_err());
    }

    #[test]
    fn plan_rejects_empty() {
        let plan = Plan { steps: vec![] };
        assert!(plan.validated_steps(&[repo("/srv/api")]).is_err());
    }

    #[test]
    fn remove_stale_is_silent_when_absent() {
        let dir = TempDir::new().unwrap();
        remove_stale(&dir.path().join("gone.json"));
    }
}
