//! Decides whether a failed agent invocation is worth retrying on another
//! model.
//!
//! The classifier is a pure function over the agent's combined stdout/stderr
//! text. An output is "eligible for fallback" when it looks like transient
//! infrastructure trouble (quota, network, model availability, a stuck agent
//! killed by the overseer) rather than a task-level failure. Everything not
//! matched is a task fault and stops the chain.

use crate::fallback::{Attempt, AttemptError};

/// Substrings (matched case-insensitively against the whole output) that mark
/// an agent failure as transient infrastructure trouble.
const ELIGIBLE_PATTERNS: &[&str] = &[
    // HTTP-level throttling and capacity
    "429",
    "quota",
    "rate limit",
    "resource exhausted",
    "overloaded",
    "unavailable",
    // Model availability
    "model not found",
    "does not exist",
    // Network errors
    "etimedout",
    "econnrefused",
    "econnreset",
    "enotfound",
    "timeout",
    "network error",
    // Agent binary missing
    "not installed",
    "not in path",
    "command not found",
    // Stuck-agent kill marker (see overseer)
    "lisa-overseer",
    // Known free-tier rejections
    "free plans can only use",
];

/// Returns true if `output` indicates a transient/infrastructure fault that
/// justifies falling back to the next model in the chain.
pub fn is_eligible_for_fallback(output: &str) -> bool {
    let lower = output.to_lowercase();
    ELIGIBLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Returns true iff `attempts` is non-empty AND every attempt failed with an
/// eligible-transient or not-installed reason — i.e. no provider actually
/// attempted the task. This is the loop's signal to stop rather than spin.
pub fn is_complete_provider_exhaustion(attempts: &[Attempt]) -> bool {
    if attempts.is_empty() {
        return false;
    }
    attempts.iter().all(|a| {
        !a.success
            && matches!(
                a.error,
                Some(AttemptError::EligibleTransient) | Some(AttemptError::NotInstalled)
            )
    })
}
