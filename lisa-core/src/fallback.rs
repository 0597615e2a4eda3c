use std::time::Duration;

/// A (provider, optional model) pair.
///
/// A config holds an ordered list of these; the order defines fallback
/// priority. Duplicates are allowed — they simply retry the same provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: String,
    pub model: Option<String>,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model: Option<String>) -> Self {
        Self {
            provider: provider.into(),
            model,
        }
    }

    /// Attribution label: `"<provider>/<model>"` when a model is set,
    /// otherwise just the provider name.
    pub fn label(&self) -> String {
        match &self.model {
            Some(m) => format!("{}/{}", self.provider, m),
            None => self.provider.clone(),
        }
    }
}

/// Why a provider attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptError {
    /// Transient infrastructure fault — the chain moves on to the next spec.
    EligibleTransient,
    /// The agent ran and reported a task-level failure — the chain stops here.
    TaskFault,
    /// The provider binary is missing or not runnable.
    NotInstalled,
}

impl AttemptError {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptError::EligibleTransient => "eligible-transient",
            AttemptError::TaskFault => "task-fault",
            AttemptError::NotInstalled => "not-installed",
        }
    }
}

/// Record of one provider invocation within a fallback chain.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub provider: String,
    pub model: Option<String>,
    pub success: bool,
    pub error: Option<AttemptError>,
    pub duration: Duration,
}

impl Attempt {
    pub fn label(&self) -> String {
        match &self.model {
            Some(m) => format!("{}/{}", self.provider, m),
            None => self.provider.clone(),
        }
    }
}

/// Outcome of a full fallback chain.
#[derive(Debug, Clone)]
pub struct FallbackResult {
    /// True iff some attempt in the chain succeeded.
    pub success: bool,
    /// Last captured agent output (the successful one, or the last failure).
    pub output: String,
    /// Wall-clock time across all attempts.
    pub duration: Duration,
    /// Attribution label of the provider that ended the chain.
    pub provider_used: String,
    /// Every attempt, in chain order.
    pub attempts: Vec<Attempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_with_model() {
        let spec = ModelSpec::new("gemini", Some("gemini-2.5-pro".to_string()));
        assert_eq!(spec.label(), "gemini/gemini-2.5-pro");
    }

    #[test]
    fn label_without_model() {
        let spec = ModelSpec::new("claude", None);
        assert_eq!(spec.label(), "claude");
    }

    #[test]
    fn attempt_error_labels() {
        assert_eq!(AttemptError::EligibleTransient.as_str(), "eligible-transient");
        assert_eq!(AttemptError::TaskFault.as_str(), "task-fault");
        assert_eq!(AttemptError::NotInstalled.as_str(), "not-installed");
    }
}
