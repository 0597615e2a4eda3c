//! Port for the external issue tracker.

use anyhow::Result;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::{LisaConfig, SourceConfig};
use crate::issue::Issue;

/// Abstract contract every tracker binding implements.
///
/// The loop never touches a tracker's wire protocol; bindings translate
/// these operations into whatever the tracker speaks.
pub trait Tracker: Send + Sync {
    /// Stable identifier used in logs.
    fn name(&self) -> &str;

    /// Next issue matching the source filters, highest priority first,
    /// skipping issues whose blockers are still open. `None` when the queue
    /// is empty.
    fn fetch_next_issue(&self, source: &SourceConfig) -> Result<Option<Issue>>;

    /// Fetch one issue by bare id or canonical URL.
    fn fetch_issue_by_id(&self, id: &str) -> Result<Option<Issue>>;

    /// Move the issue to `target_state`. Fails if the state does not exist.
    fn update_status(&self, id: &str, target_state: &str) -> Result<()>;

    /// Link a PR to the issue. May be a no-op for trackers that auto-detect.
    fn attach_pull_request(&self, id: &str, pr_url: &str) -> Result<()>;

    /// Move to the done state plus optional label removal, one call.
    fn complete_issue(&self, id: &str, done_state: &str, remove_label: Option<&str>) -> Result<()>;

    /// Idempotent; silently succeeds if the label is absent.
    fn remove_label(&self, id: &str, label: &str) -> Result<()>;

    /// All matching issues. Used by the TUI, not the loop.
    fn list_issues(&self, source: &SourceConfig) -> Result<Vec<Issue>>;
}

/// Ordering for tracker priorities on a 1..4 numeric scale, `None` lowest.
pub fn compare_priority(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Construct the configured tracker binding.
///
/// One reference binding ships in-tree (GitHub Issues via the `gh` CLI);
/// anything else is a configuration error.
pub fn create_tracker(config: &LisaConfig) -> Result<Arc<dyn Tracker>> {
    match config.source.as_str() {
        "github" => Ok(Arc::new(crate::github::GhCliTracker::from_config(
            &config.source_config,
        )?)),
        other => anyhow::bail!("no tracker binding for source '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_sorts_p1_first_and_none_last() {
        let mut priorities = vec![None, Some(3), Some(1), Some(2)];
        priorities.sort_by(|a, b| compare_priority(*a, *b));
        assert_eq!(priorities, vec![Some(1), Some(2), Some(3), None]);
    }

    #[test]
    fn priority_is_total_for_equal_values() {
        assert_eq!(compare_priority(Some(2), Some(2)), Ordering::Equal);
        assert_eq!(compare_priority(None, None), Ordering::Equal);
    }
}
