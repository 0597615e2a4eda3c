/// An issue fetched from the tracker.
///
/// Created when fetched and never mutated by the loop, except that the
/// dependency resolver may attach a [`Dependency`] before the session runs.
#[derive(Debug, Clone)]
pub struct Issue {
    /// Opaque tracker-assigned identifier (e.g. "INT-100", "42").
    pub id: String,
    pub title: String,
    /// Free text; may contain file/repo references.
    pub description: String,
    /// Canonical URL on the tracker.
    pub url: String,
    /// Ids of other issues that block this one.
    pub blocked_by: Vec<String>,
    /// Tracker-side numeric priority (1 = highest). `None` sorts last.
    pub priority: Option<u32>,
    /// Explicit repo routing hint, when the tracker carries one.
    pub repo: Option<String>,
    /// Resolved blocker context, attached when the resolver succeeds.
    pub dependency: Option<Dependency>,
}

impl Issue {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            url: String::new(),
            blocked_by: Vec::new(),
            priority: None,
            repo: None,
            dependency: None,
        }
    }
}

/// Resolved result of "this issue is blocked by X and X has an open PR on
/// branch B modifying files F…".
///
/// Consumed by the prompt builder (so the agent knows which files already
/// exist) and by PR base-branch selection (stacked PRs that retarget
/// automatically when the blocker merges).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub blocker_id: String,
    pub branch: String,
    pub pr_url: String,
    pub files: Vec<String>,
}
