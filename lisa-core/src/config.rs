//! Configuration for the loop, loaded from `<projectRoot>/.lisa/config.yaml`.
//!
//! Validation failures here are the only fatal-configuration errors: the
//! binary reports them and exits 1 before the loop starts.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fallback::ModelSpec;
use crate::overseer::OverseerConfig;

const DEFAULT_BASE_BRANCH: &str = "main";
const DEFAULT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;
const DEFAULT_STUCK_THRESHOLD_SECS: u64 = 300;

/// Accepted PR platforms.
const KNOWN_PLATFORMS: &[&str] = &["cli", "token", "gitlab", "bitbucket"];

/// Checkout strategy for sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workflow {
    /// Isolated worktree per session (default).
    Worktree,
    /// Agent works in the repo's normal checkout; branches detected after.
    Branch,
}

impl Default for Workflow {
    fn default() -> Self {
        Workflow::Worktree
    }
}

/// Tracker-side filters and the three named states the loop drives between.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    /// One or more pickup labels.
    #[serde(default)]
    pub label: Labels,
    /// Label removed on completion. Separate from the state labels because
    /// not every tracker uses labels as the state signal.
    #[serde(default)]
    pub remove_label: Option<String>,
    /// State issues are selected from.
    pub pick_from: String,
    /// State issues are moved to while a session runs.
    pub in_progress: String,
    /// State issues are moved to on success.
    pub done: String,
}

/// A label field that accepts either a single string or a list in YAML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
pub enum Labels {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl Labels {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            Labels::None => Vec::new(),
            Labels::One(s) => vec![s.clone()],
            Labels::Many(v) => v.clone(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            Labels::None => None,
            Labels::One(s) => Some(s),
            Labels::Many(v) => v.first().map(String::as_str),
        }
    }
}

/// One repository the loop may route issues to.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub path: PathBuf,
    /// Title prefix routing an issue to this repo.
    #[serde(default, rename = "match")]
    pub match_prefix: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProviderOptions {
    /// Ordered model names; order defines fallback priority.
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopConfig {
    /// Sleep between sessions, in seconds.
    #[serde(default = "default_cooldown")]
    pub cooldown: u64,
    /// Max sessions per run; 0 = unbounded.
    #[serde(default)]
    pub max_sessions: u64,
}

fn default_cooldown() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN_SECS,
            max_sessions: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverseerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: u64,
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_stuck_threshold() -> u64 {
    DEFAULT_STUCK_THRESHOLD_SECS
}

impl Default for OverseerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: DEFAULT_CHECK_INTERVAL_SECS,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD_SECS,
        }
    }
}

impl OverseerSettings {
    pub fn to_overseer_config(&self) -> OverseerConfig {
        OverseerConfig {
            enabled: self.enabled,
            check_interval: Duration::from_secs(self.check_interval),
            stuck_threshold: Duration::from_secs(self.stuck_threshold),
        }
    }
}

/// The full configuration, as parsed from `.lisa/config.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct LisaConfig {
    /// Primary agent provider name (head of the fallback chain).
    pub provider: String,
    #[serde(default)]
    pub provider_options: HashMap<String, ProviderOptions>,
    /// Tracker name.
    pub source: String,
    pub source_config: SourceConfig,
    #[serde(default)]
    pub workflow: Workflow,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
    #[serde(default, rename = "loop")]
    pub loop_config: LoopConfig,
    #[serde(default)]
    pub overseer: OverseerSettings,
    /// Ring the terminal bell when a session completes.
    #[serde(default)]
    pub bell: bool,
}

fn default_platform() -> String {
    "cli".to_string()
}

fn default_base_branch() -> String {
    DEFAULT_BASE_BRANCH.to_string()
}

impl LisaConfig {
    /// Load and validate the config for a project root.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(".lisa").join("config.yaml");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("missing config file: {}", path.display()))?;
        let mut config: LisaConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid config: {}", path.display()))?;

        if config.repos.is_empty() {
            let name = project_root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string());
            config.repos.push(RepoConfig {
                name,
                path: project_root.to_path_buf(),
                match_prefix: None,
                base_branch: None,
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a config from YAML without touching the filesystem (tests).
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LisaConfig = serde_yaml::from_str(yaml).context("invalid config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            bail!("config: provider must not be empty");
        }
        if self.source.trim().is_empty() {
            bail!("config: source must not be empty");
        }
        if !KNOWN_PLATFORMS.contains(&self.platform.as_str()) {
            bail!(
                "config: unknown platform '{}' (expected one of: {})",
                self.platform,
                KNOWN_PLATFORMS.join(", ")
            );
        }
        for state in [
            &self.source_config.pick_from,
            &self.source_config.in_progress,
            &self.source_config.done,
        ] {
            if state.trim().is_empty() {
                bail!("config: source_config states must not be empty");
            }
        }
        Ok(())
    }

    /// The ordered fallback chain.
    ///
    /// One spec per configured model of the primary provider; a provider with
    /// no models contributes a single model-less spec.
    pub fn model_specs(&self) -> Vec<ModelSpec> {
        let models = self
            .provider_options
            .get(&self.provider)
            .map(|o| o.models.clone())
            .unwrap_or_default();
        if models.is_empty() {
            return vec![ModelSpec::new(self.provider.clone(), None)];
        }
        models
            .into_iter()
            .map(|m| ModelSpec::new(self.provider.clone(), Some(m)))
            .collect()
    }

    /// Base branch for a repo, falling back to the global default.
    pub fn repo_base<'a>(&'a self, repo: &'a RepoConfig) -> &'a str {
        repo.base_branch.as_deref().unwrap_or(&self.base_branch)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.loop_config.cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
provider: claude
source: github
source_config:
  project: acme/api
  label: lisa
  pick_from: Todo
  in_progress: In Progress
  done: Done
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = LisaConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(cfg.workflow, Workflow::Worktree);
        assert_eq!(cfg.platform, "cli");
        assert_eq!(cfg.base_branch, "main");
        assert_eq!(cfg.loop_config.cooldown, DEFAULT_COOLDOWN_SECS);
        assert_eq!(cfg.loop_config.max_sessions, 0);
        assert!(cfg.overseer.enabled);
        assert_eq!(cfg.overseer.check_interval, 30);
        assert_eq!(cfg.overseer.stuck_threshold, 300);
        assert!(!cfg.bell);
    }

    #[test]
    fn model_specs_follow_provider_options_order() {
        let yaml = r#"
provider: gemini
provider_options:
  gemini:
    models: [gemini-2.5-pro, gemini-2.5-flash]
source: github
source_config:
  pick_from: Todo
  in_progress: Doing
  done: Done
"#;
        let cfg = LisaConfig::from_yaml(yaml).unwrap();
        let specs = cfg.model_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].label(), "gemini/gemini-2.5-pro");
        assert_eq!(specs[1].label(), "gemini/gemini-2.5-flash");
    }

    #[test]
    fn model_specs_default_to_bare_provider() {
        let cfg = LisaConfig::from_yaml(MINIMAL).unwrap();
        let specs = cfg.model_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].label(), "claude");
    }

    #[test]
    fn label_accepts_string_or_list() {
        let cfg = LisaConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(cfg.source_config.label.as_vec(), vec!["lisa".to_string()]);

        let yaml = MINIMAL.replace("label: lisa", "label: [lisa, auto]");
        let cfg = LisaConfig::from_yaml(&yaml).unwrap();
        assert_eq!(cfg.source_config.label.as_vec().len(), 2);
        assert_eq!(cfg.source_config.label.first(), Some("lisa"));
    }

    #[test]
    fn workflow_branch_parses() {
        let yaml = format!("{MINIMAL}workflow: branch\n");
        let cfg = LisaConfig::from_yaml(&yaml).unwrap();
        assert_eq!(cfg.workflow, Workflow::Branch);
    }

    #[test]
    fn unknown_platform_is_rejected() {
        let yaml = format!("{MINIMAL}platform: teamcity\n");
        let err = LisaConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("unknown platform"));
    }

    #[test]
    fn empty_provider_is_rejected() {
        let yaml = MINIMAL.replace("provider: claude", "provider: \"\"");
        assert!(LisaConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn repos_parse_with_match_prefix() {
        let yaml = format!(
            "{MINIMAL}repos:\n  - name: api\n    path: /srv/api\n    match: \"api:\"\n    base_branch: develop\n  - name: web\n    path: /srv/web\n"
        );
        let cfg = LisaConfig::from_yaml(&yaml).unwrap();
        assert_eq!(cfg.repos.len(), 2);
        assert_eq!(cfg.repos[0].match_prefix.as_deref(), Some("api:"));
        assert_eq!(cfg.repo_base(&cfg.repos[0]), "develop");
        assert_eq!(cfg.repo_base(&cfg.repos[1]), "main");
    }

    #[test]
    fn missing_config_file_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = LisaConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn load_synthesizes_default_repo() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".lisa")).unwrap();
        std::fs::write(dir.path().join(".lisa/config.yaml"), MINIMAL).unwrap();
        let cfg = LisaConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.repos.len(), 1);
        assert_eq!(cfg.repos[0].path, dir.path());
    }
}
