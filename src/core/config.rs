//! Process configuration from YAML

use crate::core::{
    artifact::Artifact,
    binding::{self, Reference},
    breakpoint::BreakpointSpec,
    gate::{Comparison, Predicate},
    run::RESERVED_RESULT_FIELDS,
    schema::Contract,
    step::RetryPolicy,
    task::IoAddressing,
    Process,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Top-level process configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Stable process identifier (defaults to a slug of the name)
    #[serde(default)]
    pub id: Option<String>,

    /// Process name
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Contract the run inputs must satisfy
    #[serde(default)]
    pub inputs: Contract,

    /// Default delegation timeout for phases (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Default retry policy for phases
    #[serde(default)]
    pub default_retry: Option<RetryPolicy>,

    /// Upper bound on phase executions per run, guards branch loops
    #[serde(default)]
    pub max_phase_runs: Option<usize>,

    /// Task definitions available to phases
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,

    /// Phases in declared order
    pub phases: Vec<PhaseConfig>,

    /// Named run outputs (binding templates over phase outputs)
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

/// Task definition as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    #[serde(default)]
    pub title: Option<String>,

    /// Capability the worker must provide
    #[serde(default = "default_agent")]
    pub agent: String,

    #[serde(default)]
    pub input: Contract,

    #[serde(default)]
    pub output: Contract,

    #[serde(default)]
    pub io: IoAddressing,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_agent() -> String {
    "general-purpose".to_string()
}

/// Phase configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Unique phase identifier
    pub id: String,

    /// Human-readable phase name (defaults to the task title)
    #[serde(default)]
    pub name: Option<String>,

    /// Task registry key
    pub task: String,

    /// Input binding template
    #[serde(default)]
    pub input: Value,

    /// Run the task once per element of this binding
    #[serde(default)]
    pub for_each: Option<String>,

    /// Whether this phase can run in parallel with adjacent independent phases
    #[serde(default)]
    pub independent: bool,

    /// Skip in the default order; reachable only through a branch
    #[serde(default)]
    pub branch_only: bool,

    /// Retry policy for this phase (overrides the process default)
    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    /// Timeout for this phase (overrides task and process)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Output field listing produced artifacts
    #[serde(default)]
    pub artifacts_field: Option<String>,

    /// Artifacts declared statically
    #[serde(default)]
    pub artifacts: Vec<Artifact>,

    #[serde(default)]
    pub gate: Option<GateConfig>,

    #[serde(default)]
    pub breakpoint: Option<BreakpointSpec>,
}

/// Quality gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Dotted path into the phase output
    pub metric: String,

    pub op: Comparison,

    pub target: Value,

    /// Error code reported on halt
    #[serde(default)]
    pub code: Option<String>,

    /// Phases to run instead of halting when the predicate fails
    #[serde(default)]
    pub on_fail_branch: Option<Vec<String>>,

    /// Phases that replace the remaining plan when the predicate holds
    #[serde(default)]
    pub on_pass_branch: Option<Vec<String>>,
}

impl GateConfig {
    pub fn predicate(&self) -> Predicate {
        Predicate {
            metric: self.metric.clone(),
            op: self.op,
            target: self.target.clone(),
        }
    }
}

impl ProcessConfig {
    /// Load process configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read process file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse process configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ProcessConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Identifier used for persistence and effect ids
    pub fn process_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => slugify(&self.name),
        }
    }

    /// Validate the process configuration
    pub fn validate(&self) -> Result<()> {
        if self.phases.iter().all(|p| p.branch_only) {
            anyhow::bail!("Process '{}' has no phases in its default order", self.name);
        }

        self.inputs
            .check_well_formed()
            .map_err(|e| anyhow::anyhow!("Process inputs contract: {}", e))?;

        // Tasks
        let mut task_names = HashSet::new();
        for task in &self.tasks {
            if !task_names.insert(task.name.as_str()) {
                anyhow::bail!("Duplicate task name: {}", task.name);
            }
            task.input
                .check_well_formed()
                .map_err(|e| anyhow::anyhow!("Task '{}' input contract: {}", task.name, e))?;
            task.output
                .check_well_formed()
                .map_err(|e| anyhow::anyhow!("Task '{}' output contract: {}", task.name, e))?;
            task.io
                .check()
                .with_context(|| format!("Task '{}'", task.name))?;
        }

        // Phase ids and task references
        let mut phase_ids = HashSet::new();
        for phase in &self.phases {
            if !phase_ids.insert(phase.id.as_str()) {
                anyhow::bail!("Duplicate phase ID: {}", phase.id);
            }
            if !task_names.contains(phase.task.as_str()) {
                anyhow::bail!(
                    "Phase '{}' references non-existent task '{}'",
                    phase.id,
                    phase.task
                );
            }
        }

        // Bindings only look backwards
        let mut declared: HashSet<&str> = HashSet::new();
        for phase in &self.phases {
            let fan_out = phase.for_each.is_some();

            for reference in binding::references(&phase.input)? {
                check_reference(&phase.id, &reference, &declared, fan_out, "input")?;
            }
            if let Some(for_each) = &phase.for_each {
                let template = Value::String(for_each.clone());
                let refs = binding::references(&template)?;
                if refs.is_empty() {
                    anyhow::bail!(
                        "Phase '{}' for_each must be a binding reference, got '{}'",
                        phase.id,
                        for_each
                    );
                }
                for reference in refs {
                    check_reference(&phase.id, &reference, &declared, false, "for_each")?;
                }
            }

            declared.insert(phase.id.as_str());

            // The summary is bound after the phase itself has completed
            if let Some(breakpoint) = &phase.breakpoint {
                for template in breakpoint.summary.values() {
                    for reference in binding::references(template)? {
                        check_reference(&phase.id, &reference, &declared, false, "breakpoint summary")?;
                    }
                }
            }
        }

        // Branch targets
        for phase in &self.phases {
            let mut targets: Vec<&String> = Vec::new();
            if let Some(gate) = &phase.gate {
                targets.extend(gate.on_fail_branch.iter().flatten());
                targets.extend(gate.on_pass_branch.iter().flatten());
            }
            if let Some(breakpoint) = &phase.breakpoint {
                targets.extend(breakpoint.on_reject.iter().flatten());
            }
            for target in targets {
                if !phase_ids.contains(target.as_str()) {
                    anyhow::bail!(
                        "Phase '{}' branches to non-existent phase '{}'",
                        phase.id,
                        target
                    );
                }
            }
        }

        self.check_batches()?;

        // Outputs may name any phase; unreached phases surface at run end
        for (name, template) in &self.outputs {
            if RESERVED_RESULT_FIELDS.contains(&name.as_str()) {
                anyhow::bail!("Output '{}' collides with a reserved result field", name);
            }
            for reference in binding::references(template)? {
                match reference {
                    Reference::Input { .. } => {}
                    Reference::Phase { phase, .. } => {
                        if !phase_ids.contains(phase.as_str()) {
                            anyhow::bail!(
                                "Output '{}' references non-existent phase '{}'",
                                name,
                                phase
                            );
                        }
                    }
                    Reference::Item { .. } => {
                        anyhow::bail!("Output '{}' cannot reference $item", name);
                    }
                }
            }
        }

        if self.max_phase_runs == Some(0) {
            anyhow::bail!("max_phase_runs must be at least 1");
        }

        Ok(())
    }

    /// Consecutive independent phases form a batch. Members must not bind
    /// each other and cannot suspend or redirect the run.
    fn check_batches(&self) -> Result<()> {
        let default_order: Vec<&PhaseConfig> =
            self.phases.iter().filter(|p| !p.branch_only).collect();

        for batch in default_order.split(|p| !p.independent) {
            if batch.len() < 2 {
                continue;
            }
            let members: HashSet<&str> = batch.iter().map(|p| p.id.as_str()).collect();
            for phase in batch {
                if phase.breakpoint.is_some() {
                    anyhow::bail!(
                        "Independent phase '{}' cannot declare a breakpoint",
                        phase.id
                    );
                }
                if let Some(gate) = &phase.gate {
                    if gate.on_fail_branch.is_some() || gate.on_pass_branch.is_some() {
                        anyhow::bail!(
                            "Independent phase '{}' cannot declare gate branches",
                            phase.id
                        );
                    }
                }
                let mut refs = binding::references(&phase.input)?;
                if let Some(for_each) = &phase.for_each {
                    refs.extend(binding::references(&Value::String(for_each.clone()))?);
                }
                for reference in refs {
                    if let Reference::Phase { phase: target, .. } = reference {
                        if members.contains(target.as_str()) {
                            anyhow::bail!(
                                "Independent phase '{}' binds '{}' from the same batch",
                                phase.id,
                                target
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Convert config to a Process domain model
    pub fn to_process(&self) -> Result<Process> {
        Process::from_config(self)
    }
}

fn check_reference(
    phase_id: &str,
    reference: &Reference,
    declared: &HashSet<&str>,
    item_allowed: bool,
    location: &str,
) -> Result<()> {
    match reference {
        Reference::Input { .. } => Ok(()),
        Reference::Phase { phase, .. } => {
            if declared.contains(phase.as_str()) {
                Ok(())
            } else {
                anyhow::bail!(
                    "Phase '{}' {} references phase '{}' which is not declared before it",
                    phase_id,
                    location,
                    phase
                )
            }
        }
        Reference::Item { .. } => {
            if item_allowed {
                Ok(())
            } else {
                anyhow::bail!(
                    "Phase '{}' {} uses $item outside a for_each phase",
                    phase_id,
                    location
                )
            }
        }
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}
