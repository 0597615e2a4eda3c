//! GitHub Issues tracker binding, via the `gh` CLI.
//!
//! The three source states map onto labels: picking an issue up swaps the
//! pick-from label for the in-progress label, finishing swaps it for the
//! done label and closes the issue. Uses subprocess calls so lisa inherits
//! the user's existing `gh auth` session.

use anyhow::{bail, Context, Result};
use std::process::{Command, Stdio};

use crate::config::SourceConfig;
use crate::issue::Issue;
use crate::tracker::Tracker;

pub struct GhCliTracker {
    /// Repository in "owner/repo" form.
    repo: String,
    /// The three state labels, in pick_from/in_progress/done order.
    states: [String; 3],
}

impl GhCliTracker {
    pub fn from_config(source: &SourceConfig) -> Result<Self> {
        let repo = source
            .project
            .clone()
            .filter(|p| p.contains('/'))
            .ok_or_else(|| {
                anyhow::anyhow!("github source requires source_config.project as owner/repo")
            })?;
        Ok(Self {
            repo,
            states: [
                source.pick_from.clone(),
                source.in_progress.clone(),
                source.done.clone(),
            ],
        })
    }

    /// Run a `gh` command and capture stdout as a trimmed String.
    fn gh_output(args: &[&str]) -> Result<String> {
        let out = Command::new("gh")
            .args(args)
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

    /// Run a `gh` command and return true if it succeeded.
    fn gh_status(args: &[&str]) -> bool {
        Command::new("gh")
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn canonical_url(&self, id: &str) -> String {
        format!("https://github.com/{}/issues/{}", self.repo, id)
    }

    fn issue_from_json(&self, v: &serde_json::Value) -> Option<Issue> {
        let number = v["number"].as_u64()?;
        let body = v["body"].as_str().unwrap_or("").to_string();
        Some(Issue {
            id: number.to_string(),
            title: v["title"].as_str().unwrap_or("").to_string(),
            description: body.clone(),
            url: v["url"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| self.canonical_url(&number.to_string())),
            blocked_by: extract_blockers(&body),
            priority: None,
            repo: None,
            dependency: None,
        })
    }

    fn is_issue_open(&self, id: &str) -> bool {
        GhCliTracker::gh_output(&[
            "issue", "view", id, "--repo", &self.repo, "--json", "state", "-q", ".state",
        ])
        .map(|s| s == "OPEN")
        .unwrap_or(false)
    }

    fn list_candidates(&self, source: &SourceConfig) -> Result<Vec<Issue>> {
        let mut args: Vec<String> = vec![
            "issue".into(),
            "list".into(),
            "--repo".into(),
            self.repo.clone(),
            "--state".into(),
            "open".into(),
            "--label".into(),
            source.pick_from.clone(),
        ];
        for label in source.label.as_vec() {
            args.push("--label".into());
            args.push(label);
        }
        args.extend([
            "--json".into(),
            "number,title,body,url".into(),
            "--limit".into(),
            "50".into(),
        ]);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = GhCliTracker::gh_output(&arg_refs)?;
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap_or(serde_json::json!([]));

        Ok(parsed
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| self.issue_from_json(v))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Tracker for GhCliTracker {
    fn name(&self) -> &str {
        "github"
    }

    fn fetch_next_issue(&self, source: &SourceConfig) -> Result<Option<Issue>> {
        for issue in self.list_candidates(source)? {
            let blocked = issue.blocked_by.iter().any(|b| self.is_issue_open(b));
            if !blocked {
                return Ok(Some(issue));
            }
        }
        Ok(None)
    }

    fn fetch_issue_by_id(&self, id: &str) -> Result<Option<Issue>> {
        let Some(id) = parse_issue_ref(id) else {
            bail!("not a valid issue id or URL: {id}");
        };
        let out = GhCliTracker::gh_output(&[
            "issue",
            "view",
            &id,
            "--repo",
            &self.repo,
            "--json",
            "number,title,body,url",
        ]);
        match out {
            Ok(json) => {
                let v: serde_json::Value = serde_json::from_str(&json).unwrap_or_default();
                Ok(self.issue_from_json(&v))
            }
            Err(_) => Ok(None),
        }
    }

    fn update_status(&self, id: &str, target_state: &str) -> Result<()> {
        if !self.states.iter().any(|s| s == target_state) {
            bail!("unknown state '{target_state}' for {}", self.repo);
        }
        for state in &self.states {
            if state != target_state {
                let _ = GhCliTracker::gh_status(&[
                    "issue",
                    "edit",
                    id,
                    "--repo",
                    &self.repo,
                    "--remove-label",
                    state,
                ]);
            }
        }
        if !GhCliTracker::gh_status(&[
            "issue",
            "edit",
            id,
            "--repo",
            &self.repo,
            "--add-label",
            target_state,
        ]) {
            bail!("failed to move issue {id} to '{target_state}'");
        }
        Ok(())
    }

    fn attach_pull_request(&self, id: &str, pr_url: &str) -> Result<()> {
        if !GhCliTracker::gh_status(&[
            "issue",
            "comment",
            id,
            "--repo",
            &self.repo,
            "--body",
            &format!("Pull request: {pr_url}"),
        ]) {
            bail!("failed to attach PR to issue {id}");
        }
        Ok(())
    }

    fn complete_issue(&self, id: &str, done_state: &str, remove_label: Option<&str>) -> Result<()> {
        self.update_status(id, done_state)?;
        if let Some(label) = remove_label {
            self.remove_label(id, label)?;
        }
        let _ = GhCliTracker::gh_status(&["issue", "close", id, "--repo", &self.repo]);
        Ok(())
    }

    fn remove_label(&self, id: &str, label: &str) -> Result<()> {
        // gh exits zero even when the label is already absent.
        let _ = GhCliTracker::gh_status(&[
            "issue",
            "edit",
            id,
            "--repo",
            &self.repo,
            "--remove-label",
            label,
        ]);
        Ok(())
    }

    fn list_issues(&self, source: &SourceConfig) -> Result<Vec<Issue>> {
        self.list_candidates(source)
    }
}

/// Extract blocker issue ids from an issue body.
///
/// Recognizes "blocked by #N" and "depends on #N", case-insensitively.
pub fn extract_blockers(body: &str) -> Vec<String> {
    let mut blockers = Vec::new();
    for line in body.lines() {
        let lower = line.to_lowercase();
        for keyword in &["blocked by #", "depends on #"] {
            let mut rest = lower.as_str();
            while let Some(pos) = rest.find(keyword) {
                let tail = &rest[pos + keyword.len()..];
                let num: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
                if !num.is_empty() && !blockers.contains(&num) {
                    blockers.push(num.clone());
                }
                rest = tail;
            }
        }
    }
    blockers
}

/// Accept a bare issue number or a canonical issue URL.
pub fn parse_issue_ref(input: &str) -> Option<String> {
    let input = input.trim();
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        return Some(input.to_string());
    }
    let (_, tail) = input.rsplit_once("/issues/")?;
    let num: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    if num.is_empty() {
        None
    } else {
        Some(num)
    }
}
