//! Resolves blocked issues into stacked-PR context.
//!
//! For a blocked issue, find the first blocker that already has a branch in
//! the repo and an open PR, and record which files that PR changed. The
//! session then bases the new branch's PR on the blocker's branch, so the
//! chain retargets automatically when the blocker merges.

use std::path::Path;

use crate::issue::{Dependency, Issue};
use crate::platform::Platform;
use crate::worktree::find_branch_by_issue_id;

/// Resolve the dependency context for `issue`, if any.
///
/// Blockers are tried in list order; the first with a branch and an open PR
/// wins. Lookup errors are treated as "no dependency" — the tracker was
/// supposed to hide blocked issues, and a racing blocker merge just means
/// the issue is effectively unblocked.
pub fn resolve_dependency(
    issue: &Issue,
    repo_path: &Path,
    base_branch: &str,
    platform: &dyn Platform,
) -> Option<Dependency> {
    for blocker_id in &issue.blocked_by {
        let Ok(Some(branch)) = find_branch_by_issue_id(repo_path, blocker_id) else {
            continue;
        };
        let Ok(Some(pr_url)) = platform.find_open_pr(repo_path, &branch) else {
            continue;
        };
        let files = platform
            .get_changed_files(repo_path, base_branch, &branch)
            .unwrap_or_default();
        return Some(Dependency {
            blocker_id: blocker_id.clone(),
            branch,
            pr_url,
            files,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PullRequestSpec, RepoInfo};
    use anyhow::Result;
    use std::collections::HashMap;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    struct MockPlatform {
        open_prs: HashMap<String, String>,
        changed_files: Vec<String>,
    }

    impl Platform for MockPlatform {
        fn create_pull_request(&self, _spec: &PullRequestSpec) -> Result<String> {
            unreachable!("resolver never creates PRs")
        }

        fn find_open_pr(&self, _repo: &Path, branch: &str) -> Result<Option<String>> {
            Ok(self.open_prs.get(branch).cloned())
        }

        fn get_changed_files(&self, _repo: &Path, _base: &str, _head: &str) -> Result<Vec<String>> {
            Ok(self.changed_files.clone())
        }

        fn get_repo_info(&self, _cwd: &Path) -> Result<RepoInfo> {
            unreachable!("resolver never needs repo info")
        }
    }

    fn init_repo_with_branch(branch: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "t@lisa.dev"]);
        run(&["config", "user.name", "T"]);
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "init"]);
        run(&["branch", branch]);
        dir
    }

    fn blocked_issue(blockers: &[&str]) -> Issue {
        let mut issue = Issue::new("INT-200", "Consume endpoint");
        issue.blocked_by = blockers.iter().map(|s| s.to_string()).collect();
        issue
    }

    #[test]
    fn resolves_first_blocker_with_open_pr() {
        let repo = init_repo_with_branch("feat/int-100-add-endpoint");
        let platform = MockPlatform {
            open_prs: HashMap::from([(
                "feat/int-100-add-endpoint".to_string(),
                "https://github.com/a/b/pull/5".to_string(),
            )]),
            changed_files: vec!["src/api.rs".to_string()],
        };

        let dep = resolve_dependency(
            &blocked_issue(&["INT-100"]),
            repo.path(),
            "main",
            &platform,
        )
        .unwrap();
        assert_eq!(dep.blocker_id, "INT-100");
        assert_eq!(dep.branch, "feat/int-100-add-endpoint");
        assert_eq!(dep.pr_url, "https://github.com/a/b/pull/5");
        assert_eq!(dep.files, vec!["src/api.rs".to_string()]);
    }

    #[test]
    fn no_branch_means_unblocked() {
        let repo = init_repo_with_branch("unrelated");
        let platform = MockPlatform {
            open_prs: HashMap::new(),
            changed_files: vec![],
        };
        assert!(resolve_dependency(&blocked_issue(&["INT-100"]), repo.path(), "main", &platform)
            .is_none());
    }

    #[test]
    fn branch_without_open_pr_is_skipped() {
        let repo = init_repo_with_branch("feat/int-100-add-endpoint");
        let platform = MockPlatform {
            open_prs: HashMap::new(),
            changed_files: vec![],
        };
        assert!(resolve_dependency(&blocked_issue(&["INT-100"]), repo.path(), "main", &platform)
            .is_none());
    }

    #[test]
    fn first_found_blocker_wins() {
        let repo = init_repo_with_branch("feat/int-100-a");
        let run = |args: &[&str]| {
            Command::new("git")
                .args(args)
                .current_dir(repo.path())
                .output()
                .unwrap();
        };
        run(&["branch", "feat/int-101-b"]);

        let platform = MockPlatform {
            open_prs: HashMap::from([
                ("feat/int-100-a".to_string(), "pr-100".to_string()),
                ("feat/int-101-b".to_string(), "pr-101".to_string()),
            ]),
            changed_files: vec![],
        };

        let dep = resolve_dependency(
            &blocked_issue(&["INT-101", "INT-100"]),
            repo.path(),
            "main",
            &platform,
        )
        .unwrap();
        assert_eq!(dep.blocker_id, "INT-101");
    }

    #[test]
    fn no_blockers_resolves_to_none() {
        let dir = TempDir::new().unwrap();
        let platform = MockPlatform {
            open_prs: HashMap::new(),
            changed_files: vec![],
        };
        let issue = Issue::new("INT-1", "x");
        assert!(resolve_dependency(&issue, dir.path(), "main", &platform).is_none());
    }

}
