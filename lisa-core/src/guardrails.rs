//! Rolling log of prior agent failures, injected into subsequent prompts.
//!
//! A process-wide markdown file keeps the most recent failures so later
//! invocations can avoid repeating them. The file is written only from the
//! main thread between agent invocations; the agent runner reads it before
//! each invocation. No locking required.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use crate::cache;

/// Maximum number of entries retained; the oldest are discarded on overflow.
pub const MAX_ENTRIES: usize = 20;

/// Lines of failure context kept per entry.
const CONTEXT_LINES: usize = 20;

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailsEntry {
    pub issue_id: String,
    pub date: String,
    pub provider: String,
    /// Short error-category label (e.g. "eligible-transient").
    pub label: String,
    /// Tail of the agent output, at most [`CONTEXT_LINES`] lines.
    pub context: String,
}

impl GuardrailsEntry {
    /// Build an entry from raw agent output, keeping only the output tail.
    pub fn from_output(issue_id: &str, provider: &str, label: &str, output: &str) -> Self {
        let lines: Vec<&str> = output.lines().collect();
        let start = lines.len().saturating_sub(CONTEXT_LINES);
        Self {
            issue_id: issue_id.to_string(),
            date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            provider: provider.to_string(),
            label: label.to_string(),
            context: lines[start..].join("\n"),
        }
    }

    fn render(&self) -> String {
        format!(
            "### {} — {} — {} — {}\n\n```\n{}\n```\n",
            self.issue_id, self.date, self.provider, self.label, self.context
        )
    }
}

/// The rolling guardrails file.
pub struct GuardrailsStore {
    path: PathBuf,
}

impl GuardrailsStore {
    /// Open the store for a project, migrating the legacy in-project file
    /// into the cache directory if one exists there.
    pub fn open(cache_dir: &Path, project_root: &Path) -> Self {
        let path = cache::guardrails_path(cache_dir);
        let legacy = cache::legacy_guardrails_path(project_root);
        if !path.exists() && legacy.exists() {
            if fs::rename(&legacy, &path).is_err() {
                // Cross-device rename can fail; fall back to copy + remove.
                if fs::copy(&legacy, &path).is_ok() {
                    let _ = fs::remove_file(&legacy);
                }
            }
        }
        Self { path }
    }

    /// Open a store at an explicit path (tests).
    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append an entry, truncating to the most recent [`MAX_ENTRIES`].
    pub fn append(&self, entry: &GuardrailsEntry) -> Result<()> {
        let mut entries = self.read_entries();
        entries.push(entry.render());
        let start = entries.len().saturating_sub(MAX_ENTRIES);
        let content = entries[start..].join("\n");

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Truncate-rewrite via temp + rename so readers never see a partial file.
        let tmp = self.path.with_extension("md.tmp");
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        f.write_all(content.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Render the file as a prompt fragment. Empty string when absent.
    pub fn read_section(&self) -> String {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) if !c.trim().is_empty() => c,
            _ => return String::new(),
        };
        format!("## Avoid these known pitfalls\n\n{}", content.trim_end())
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_entries(&self) -> Vec<String> {
        let content = fs::read_to_string(&self.path).unwrap_or_default();
        let mut entries = Vec::new();
        for block in format!("\n{content}").split("\n### ") {
            if block.trim().is_empty() {
                continue;
            }
            entries.push(format!("### {}", block.trim_end_matches('\n')));
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(n: usize) -> GuardrailsEntry {
        GuardrailsEntry::from_output(
            &format!("INT-{n}"),
            "claude",
            "eligible-transient",
            &format!("error number {n}"),
        )
    }

    #[test]
    fn append_then_read_section() {
        let dir = TempDir::new().unwrap();
        let store = GuardrailsStore::at_path(dir.path().join("guardrails.md"));
        store.append(&entry(1)).unwrap();

        let section = store.read_section();
        assert!(section.starts_with("## Avoid these known pitfalls"));
        assert!(section.contains("INT-1"));
        assert!(section.contains("error number 1"));
    }

    #[test]
    fn read_section_empty_when_absent() {
        let dir = TempDir::new().unwrap();
        let store = GuardrailsStore::at_path(dir.path().join("guardrails.md"));
        assert_eq!(store.read_section(), "");
    }

    #[test]
    fn truncates_to_max_entries() {
        let dir = TempDir::new().unwrap();
        let store = GuardrailsStore::at_path(dir.path().join("guardrails.md"));
        for n in 0..MAX_ENTRIES + 5 {
            store.append(&entry(n)).unwrap();
        }
        assert_eq!(store.len(), MAX_ENTRIES);

        // Oldest entries are gone, newest kept.
        let section = store.read_section();
        assert!(!section.contains("INT-0 "));
        assert!(section.contains(&format!("INT-{}", MAX_ENTRIES + 4)));
    }

    #[test]
    fn entry_keeps_only_output_tail() {
        let long_output: String = (0..50)
            .map(|n| format!("line {n}\n"))
            .collect();
        let e = GuardrailsEntry::from_output("INT-9", "claude", "task-fault", &long_output);
        assert!(!e.context.contains("line 0\n"));
        assert!(e.context.contains("line 49"));
        assert_eq!(e.context.lines().count(), 20);
    }

    #[test]
    fn legacy_file_is_migrated() {
        let cache = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let legacy_dir = project.path().join(".lisa");
        fs::create_dir_all(&legacy_dir).unwrap();
        fs::write(legacy_dir.join("guardrails.md"), "### OLD-1 — x — y — z\n").unwrap();

        let store = GuardrailsStore::open(cache.path(), project.path());
        assert!(store.read_section().contains("OLD-1"));
        assert!(!legacy_dir.join("guardrails.md").exists());
    }
}
