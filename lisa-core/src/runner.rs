//! The model fallback chain.
//!
//! Iterates an ordered list of [`ModelSpec`]s, invoking each provider until
//! one succeeds or a task-level failure stops the chain. Transient failures
//! are recorded in the guardrails file and the chain moves on.

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::agent::{self, Agent, AgentRunOptions};
use crate::classifier::is_eligible_for_fallback;
use crate::fallback::{Attempt, AttemptError, FallbackResult, ModelSpec};
use crate::guardrails::{GuardrailsEntry, GuardrailsStore};

/// Port for constructing agent bindings, so the chain can be exercised with
/// fakes.
pub trait AgentFactory {
    fn create(&self, provider: &str) -> Result<Box<dyn Agent>>;
}

/// Factory backed by the in-tree bindings.
pub struct DefaultAgentFactory;

impl AgentFactory for DefaultAgentFactory {
    fn create(&self, provider: &str) -> Result<Box<dyn Agent>> {
        agent::create_agent(provider)
    }
}

/// Whether the primary provider manages its own worktrees.
pub fn primary_supports_native_worktree(factory: &dyn AgentFactory, specs: &[ModelSpec]) -> bool {
    specs
        .first()
        .and_then(|spec| factory.create(&spec.provider).ok())
        .is_some_and(|agent| agent.supports_native_worktree())
}

/// Run the chain to completion.
///
/// Per spec: probe availability, concatenate the guardrails section to the
/// prompt, invoke the provider, and on failure classify the output —
/// eligible-transient continues with the next spec, a task fault stops the
/// chain at the faulting spec.
pub fn run_with_fallback(
    factory: &dyn AgentFactory,
    specs: &[ModelSpec],
    prompt: &str,
    opts: &AgentRunOptions,
    guardrails: &GuardrailsStore,
) -> FallbackResult {
    let start = Instant::now();
    let mut attempts: Vec<Attempt> = Vec::new();
    let mut last_output = String::new();

    for spec in specs {
        let agent = match factory.create(&spec.provider) {
            Ok(a) => a,
            Err(e) => {
                println!("[runner] {}: {e}", spec.label());
                attempts.push(failed_attempt(spec, AttemptError::NotInstalled, Duration::ZERO));
                continue;
            }
        };
        if !agent.is_available() {
            println!("[runner] {} is not installed, skipping", spec.label());
            attempts.push(failed_attempt(spec, AttemptError::NotInstalled, Duration::ZERO));
            continue;
        }

        let full_prompt = match guardrails.read_section() {
            s if s.is_empty() => prompt.to_string(),
            s => format!("{prompt}\n\n{s}"),
        };

        let attempt_opts = opts.with_model(spec.model.clone());
        println!("[runner] invoking {}", spec.label());
        let attempt_start = Instant::now();

        let outcome = match agent.run(&full_prompt, &attempt_opts) {
            Ok(o) => o,
            Err(e) => {
                // Spawn-level failure: infrastructure, not the task.
                println!("[runner] {} failed to start: {e}", spec.label());
                attempts.push(failed_attempt(
                    spec,
                    AttemptError::EligibleTransient,
                    attempt_start.elapsed(),
                ));
                last_output = e.to_string();
                continue;
            }
        };

        if outcome.success {
            attempts.push(Attempt {
                provider: spec.provider.clone(),
                model: spec.model.clone(),
                success: true,
                error: None,
                duration: outcome.duration,
            });
            return FallbackResult {
                success: true,
                output: outcome.output,
                duration: start.elapsed(),
                provider_used: spec.label(),
                attempts,
            };
        }

        let error = if is_eligible_for_fallback(&outcome.output) {
            AttemptError::EligibleTransient
        } else {
            AttemptError::TaskFault
        };
        let entry = GuardrailsEntry::from_output(
            &opts.issue_id,
            &spec.label(),
            error.as_str(),
            &outcome.output,
        );
        if let Err(e) = guardrails.append(&entry) {
            eprintln!("[runner] failed to record guardrails entry: {e}");
        }

        attempts.push(Attempt {
            provider: spec.provider.clone(),
            model: spec.model.clone(),
            success: false,
            error: Some(error),
            duration: outcome.duration,
        });
        last_output = outcome.output;

        match error {
            AttemptError::EligibleTransient => {
                println!(
                    "[runner] {} hit a transient failure, trying next model",
                    spec.label()
                );
            }
            _ => {
                // Task fault: no other model would fare better.
                return FallbackResult {
                    success: false,
                    output: last_output,
                    duration: start.elapsed(),
                    provider_used: spec.label(),
                    attempts,
                };
            }
        }
    }

    let provider_used = attempts.last().map(Attempt::label).unwrap_or_default();
    FallbackResult {
        success: false,
        output: last_output,
        duration: start.elapsed(),
        provider_used,
        attempts,
    }
}

fn failed_attempt(spec: &ModelSpec, error: AttemptError, duration: Duration) -> Attempt {
    Attempt {
        provider: spec.provider.clone(),
        model: spec.model.clone(),
        success: false,
        error: Some(error),
        duration,
    }
}
