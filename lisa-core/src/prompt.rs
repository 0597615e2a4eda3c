//! Prompt builders for the agent.
//!
//! Prompts are plain imperative instruction lists. Every session prompt ends
//! with the manifest contract so the loop can learn which branch to push;
//! the planning prompt ends with the plan contract instead.

use std::path::Path;

use crate::issue::Issue;
use crate::manifest::PlanStep;

/// Branch and PR produced by an earlier plan step, fed into later steps.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub repo_path: std::path::PathBuf,
    pub branch: String,
    pub pr_url: String,
}

fn push_issue_context(prompt: &mut String, issue: &Issue) {
    prompt.push_str(&format!("Issue {}: {}\n", issue.id, issue.title));
    if !issue.url.is_empty() {
        prompt.push_str(&format!("Tracker URL: {}\n", issue.url));
    }
    if !issue.description.is_empty() {
        prompt.push_str("\nDescription:\n");
        prompt.push_str(&issue.description);
        prompt.push('\n');
    }
    if let Some(dep) = &issue.dependency {
        prompt.push_str(&format!(
            "\nThis issue builds on issue {} (open PR: {}), whose branch `{}` already changed:\n",
            dep.blocker_id, dep.pr_url, dep.branch
        ));
        for file in &dep.files {
            prompt.push_str(&format!("  - {file}\n"));
        }
        prompt.push_str("Those changes are present in your checkout; build on them, do not redo them.\n");
    }
}

fn push_manifest_contract(prompt: &mut String, manifest_path: &Path, branch: &str) {
    prompt.push_str(&format!(
        "\nBefore you exit, write a JSON file at {} with this shape:\n",
        manifest_path.display()
    ));
    prompt.push_str("    {\"branch\": \"<the branch holding your work>\", \"prUrl\": \"<only if you opened a PR yourself>\", \"prTitle\": \"...\", \"prBody\": \"...\"}\n");
    prompt.push_str(&format!(
        "Use branch `{branch}` unless you had to create a different one.\n"
    ));
}

/// How the agent's checkout is arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    /// The loop pre-created a worktree; the agent is already on the branch.
    Isolated,
    /// The agent creates its own worktree.
    Native,
    /// The agent works in the repo's normal checkout (branch mode).
    InPlace,
}

/// Prompt for a single-repo session.
pub fn build_task_prompt(
    issue: &Issue,
    branch: &str,
    base_branch: &str,
    manifest_path: &Path,
    mode: CheckoutMode,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are resolving one tracked issue in this repository.\n\n");
    push_issue_context(&mut prompt, issue);

    prompt.push_str("\nInstructions:\n");
    match mode {
        CheckoutMode::Native => {
            prompt.push_str(&format!(
                "- Create your own worktree off `{base_branch}` and work there\n"
            ));
            prompt.push_str(&format!("- Name your branch `{branch}`\n"));
        }
        CheckoutMode::Isolated => {
            prompt.push_str(&format!(
                "- You are already on branch `{branch}` in an isolated checkout; stay on it\n"
            ));
        }
        CheckoutMode::InPlace => {
            prompt.push_str(&format!(
                "- Create a branch named `{branch}` off `{base_branch}` in this checkout and work there\n"
            ));
        }
    }
    prompt.push_str("- Implement the issue completely, matching the existing code style\n");
    prompt.push_str("- Run any existing tests and make sure they pass\n");
    prompt.push_str("- Commit after each logical unit of work\n");
    prompt.push_str("- Do not push and do not update the tracker; the loop does both\n");
    push_manifest_contract(&mut prompt, manifest_path, branch);
    prompt
}

/// Prompt for the multi-repo planning phase.
pub fn build_planning_prompt(issue: &Issue, repos: &[(String, &Path)], plan_path: &Path) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are planning work that spans several repositories. Do not write code yet.\n\n");
    push_issue_context(&mut prompt, issue);

    prompt.push_str("\nConfigured repositories:\n");
    for (name, path) in repos {
        prompt.push_str(&format!("  - {name}: {}\n", path.display()));
    }

    prompt.push_str(&format!(
        "\nDecide which repositories need changes and in what order, then write a JSON file at {} with this shape:\n",
        plan_path.display()
    ));
    prompt.push_str("    {\"steps\": [{\"repoPath\": \"<absolute repo path>\", \"scope\": \"<one paragraph describing the work in that repo>\", \"order\": 1}]}\n");
    prompt.push_str("Use only the repository paths listed above. Orders are ascending and steps run sequentially.\n");
    prompt
}

/// Prompt for one step of a multi-repo plan.
pub fn build_step_prompt(
    issue: &Issue,
    step: &PlanStep,
    branch: &str,
    earlier: &[StepOutcome],
    manifest_path: &Path,
    is_last: bool,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are executing one step of a multi-repository plan.\n\n");
    push_issue_context(&mut prompt, issue);

    prompt.push_str(&format!("\nThis step ({}):\n{}\n", step.repo_path.display(), step.scope));

    if !earlier.is_empty() {
        prompt.push_str("\nEarlier steps already produced:\n");
        for outcome in earlier {
            prompt.push_str(&format!(
                "  - {}: branch `{}`, PR {}\n",
                outcome.repo_path.display(),
                outcome.branch,
                outcome.pr_url
            ));
        }
        prompt.push_str("Code in those branches may not be merged yet; develop against the interfaces they introduce.\n");
    }

    prompt.push_str("\nInstructions:\n");
    prompt.push_str(&format!(
        "- You are on branch `{branch}` in an isolated checkout; stay on it\n"
    ));
    prompt.push_str("- Implement only this step's scope\n");
    prompt.push_str("- Run any existing tests and make sure they pass\n");
    if is_last {
        prompt.push_str("- This is the final step: leave a closing comment on the tracker issue summarizing all the work\n");
    } else {
        prompt.push_str("- Do not update the tracker; later steps are still pending\n");
    }
    prompt.push_str("- Do not push; the loop pushes and opens the PR\n");
    push_manifest_contract(&mut prompt, manifest_path, branch);
    prompt
}

/// Prompt asking the agent to fix whatever made `git push` fail.
pub fn build_push_recovery_prompt(branch: &str, push_output: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Pushing branch `{branch}` failed. A pre-push hook rejected the work with this output:\n\n"
    ));
    prompt.push_str("```\n");
    prompt.push_str(push_output.trim());
    prompt.push_str("\n```\n\n");
    prompt.push_str("Instructions:\n");
    prompt.push_str("- Fix the root cause (lint, types, tests) — do not bypass or disable the hook\n");
    prompt.push_str("- Amend or add commits on the same branch\n");
    prompt.push_str("- Do not push; the loop retries the push\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Dependency;
    use std::path::PathBuf;

    fn issue() -> Issue {
        let mut issue = Issue::new("INT-100", "Add logging");
        issue.description = "- [ ] add log".to_string();
        issue.url = "https://tracker.example/INT-100".to_string();
        issue
    }

    #[test]
    fn task_prompt_contains_issue_and_manifest_contract() {
        let p = build_task_prompt(
            &issue(),
            "feat/int-100-add-logging",
            "main",
            Path::new("/cache/manifest-int-100.json"),
            CheckoutMode::Isolated,
        );
        assert!(p.contains("INT-100"));
        assert!(p.contains("- [ ] add log"));
        assert!(p.contains("feat/int-100-add-logging"));
        assert!(p.contains("/cache/manifest-int-100.json"));
        assert!(p.contains("\"branch\""));
        assert!(p.contains("Do not push"));
    }

    #[test]
    fn task_prompt_native_worktree_delegates_creation() {
        let p = build_task_prompt(
            &issue(),
            "feat/int-100-add-logging",
            "main",
            Path::new("/m.json"),
            CheckoutMode::Native,
        );
        assert!(p.contains("Create your own worktree"));
        assert!(!p.contains("already on branch"));
    }

    #[test]
    fn task_prompt_in_place_asks_for_a_branch() {
        let p = build_task_prompt(
            &issue(),
            "feat/int-100-add-logging",
            "main",
            Path::new("/m.json"),
            CheckoutMode::InPlace,
        );
        assert!(p.contains("in this checkout"));
        assert!(p.contains("off `main`"));
    }

    #[test]
    fn dependency_context_lists_blocker_files() {
        let mut i = issue();
        i.dependency = Some(Dependency {
            blocker_id: "INT-90".to_string(),
            branch: "feat/int-90-endpoint".to_string(),
            pr_url: "https://github.com/a/b/pull/3".to_string(),
            files: vec!["src/api.rs".to_string()],
        });
        let p = build_task_prompt(&i, "feat/int-100-x", "main", Path::new("/m.json"), CheckoutMode::Isolated);
        assert!(p.contains("INT-90"));
        assert!(p.contains("feat/int-90-endpoint"));
        assert!(p.contains("src/api.rs"));
    }

    #[test]
    fn planning_prompt_lists_repos_and_plan_contract() {
        let api = PathBuf::from("/srv/api");
        let web = PathBuf::from("/srv/web");
        let repos = vec![("api".to_string(), api.as_path()), ("web".to_string(), web.as_path())];
        let p = build_planning_prompt(&issue(), &repos, Path::new("/cache/plan-int-100.json"));
        assert!(p.contains("/srv/api"));
        assert!(p.contains("/srv/web"));
        assert!(p.contains("\"steps\""));
        assert!(p.contains("plan-int-100.json"));
    }

    #[test]
    fn step_prompt_threads_earlier_results_and_flags_last() {
        let step = PlanStep {
            repo_path: PathBuf::from("/srv/web"),
            scope: "consume endpoint".to_string(),
            order: 2,
        };
        let earlier = vec![StepOutcome {
            repo_path: PathBuf::from("/srv/api"),
            branch: "feat/int-100-api".to_string(),
            pr_url: "https://github.com/a/api/pull/9".to_string(),
        }];

        let last = build_step_prompt(&issue(), &step, "feat/int-100-web", &earlier, Path::new("/m.json"), true);
        assert!(last.contains("pull/9"));
        assert!(last.contains("feat/int-100-api"));
        assert!(last.contains("final step"));

        let not_last =
            build_step_prompt(&issue(), &step, "feat/int-100-web", &earlier, Path::new("/m.json"), false);
        assert!(not_last.contains("Do not update the tracker"));
    }

    #[test]
    fn push_recovery_prompt_embeds_hook_output() {
        let p = build_push_recovery_prompt("feat/int-1-x", "husky - pre-push hook failed\nlint: 3 errors");
        assert!(p.contains("feat/int-1-x"));
        assert!(p.contains("lint: 3 errors"));
        assert!(p.contains("do not bypass"));
    }
}
