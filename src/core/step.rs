//! Phase domain model

use crate::core::{
    artifact::Artifact,
    binding::{self, Reference},
    breakpoint::BreakpointSpec,
    config::{GateConfig, PhaseConfig},
    gate::{GateAction, QualityGate, DEFAULT_GATE_CODE},
    task::{TaskDefinition, TaskRegistry},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Default output field that carries a phase's artifacts
pub const DEFAULT_ARTIFACTS_FIELD: &str = "artifacts";

/// A single phase of a process
#[derive(Debug, Clone)]
pub struct Phase {
    /// Unique phase identifier
    pub id: String,

    pub title: String,

    /// Resolved task definition
    pub task: Arc<TaskDefinition>,

    /// Input binding template
    pub input: Value,

    /// Binding that yields an array; the task runs once per element
    pub for_each: Option<String>,

    /// May run concurrently with adjacent independent phases
    pub independent: bool,

    /// Only reachable through a branch, skipped in the default order
    pub branch_only: bool,

    pub retry: RetryPolicy,

    /// Delegation timeout in seconds
    pub timeout_secs: u64,

    /// Output field that lists produced artifacts
    pub artifacts_field: String,

    /// Artifacts declared statically on the phase
    pub artifacts: Vec<Artifact>,

    pub gate: Option<QualityGate>,

    pub breakpoint: Option<BreakpointSpec>,
}

/// Bounded retry for failed delegations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts, doubled after each failure
    #[serde(default)]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    pub fn attempts(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_ms,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Process-wide defaults applied to phases that don't override them
#[derive(Debug, Clone)]
pub struct PhaseDefaults {
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for PhaseDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 300, // 5 minutes
            retry: RetryPolicy::none(),
        }
    }
}

impl Phase {
    /// Create a phase from its config, resolving the task in the registry
    pub fn from_config(
        config: &PhaseConfig,
        registry: &TaskRegistry,
        defaults: &PhaseDefaults,
    ) -> Result<Self> {
        let task = registry
            .resolve(&config.task)
            .with_context(|| format!("Phase '{}'", config.id))?;

        let timeout_secs = config
            .timeout_secs
            .or(task.timeout_secs)
            .unwrap_or(defaults.timeout_secs);

        let retry = config
            .retry
            .map(|r| RetryPolicy::attempts(r.max_attempts, r.backoff_ms))
            .unwrap_or(defaults.retry);

        Ok(Phase {
            id: config.id.clone(),
            title: config.name.clone().unwrap_or_else(|| task.title.clone()),
            task,
            input: config.input.clone(),
            for_each: config.for_each.clone(),
            independent: config.independent,
            branch_only: config.branch_only,
            retry,
            timeout_secs,
            artifacts_field: config
                .artifacts_field
                .clone()
                .unwrap_or_else(|| DEFAULT_ARTIFACTS_FIELD.to_string()),
            artifacts: config.artifacts.clone(),
            gate: config.gate.as_ref().map(gate_from_config),
            breakpoint: config.breakpoint.clone(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_fan_out(&self) -> bool {
        self.for_each.is_some()
    }

    /// Every binding reference this phase makes
    pub fn references(&self) -> Result<Vec<Reference>> {
        let mut refs = binding::references(&self.input)?;
        if let Some(for_each) = &self.for_each {
            refs.extend(binding::references(&Value::String(for_each.clone()))?);
        }
        if let Some(breakpoint) = &self.breakpoint {
            for template in breakpoint.summary.values() {
                refs.extend(binding::references(template)?);
            }
        }
        Ok(refs)
    }

    /// Phase ids this phase may branch to
    pub fn branch_targets(&self) -> Vec<&str> {
        let mut targets = Vec::new();
        if let Some(gate) = &self.gate {
            if let GateAction::Branch(phases) = &gate.on_fail {
                targets.extend(phases.iter().map(String::as_str));
            }
            if let Some(phases) = &gate.on_pass {
                targets.extend(phases.iter().map(String::as_str));
            }
        }
        if let Some(phases) = self.breakpoint.as_ref().and_then(|b| b.on_reject.as_ref()) {
            targets.extend(phases.iter().map(String::as_str));
        }
        targets
    }
}

fn gate_from_config(config: &GateConfig) -> QualityGate {
    QualityGate {
        predicate: config.predicate(),
        code: config
            .code
            .clone()
            .unwrap_or_else(|| DEFAULT_GATE_CODE.to_string()),
        on_fail: match &config.on_fail_branch {
            Some(phases) => GateAction::Branch(phases.clone()),
            None => GateAction::Halt,
        },
        on_pass: config.on_pass_branch.clone(),
    }
}
