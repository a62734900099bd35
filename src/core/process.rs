//! Process domain model

use crate::core::{
    config::ProcessConfig,
    schema::Contract,
    step::{Phase, PhaseDefaults, RetryPolicy},
    task::{TaskDefinition, TaskRegistry},
};
use anyhow::Result;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Default bound on phase executions per run
pub const DEFAULT_MAX_PHASE_RUNS: usize = 100;

/// A process definition: a static list of phases over a task registry
#[derive(Debug, Clone)]
pub struct Process {
    /// Stable process identifier
    pub id: String,

    /// Process name
    pub name: String,

    pub version: Option<String>,

    pub description: Option<String>,

    /// Contract the run inputs must satisfy
    pub input_contract: Contract,

    /// Tasks available to phases
    pub tasks: TaskRegistry,

    /// Named run outputs
    pub outputs: BTreeMap<String, Value>,

    /// Upper bound on phase executions per run
    pub max_phase_runs: usize,

    /// Phases by id
    phases: HashMap<String, Phase>,

    /// Phase ids in declared order
    declared_order: Vec<String>,
}

impl Process {
    /// Create a process from configuration, resolving every task reference
    pub fn from_config(config: &ProcessConfig) -> Result<Self> {
        let defaults = PhaseDefaults {
            timeout_secs: config
                .default_timeout_secs
                .unwrap_or(PhaseDefaults::default().timeout_secs),
            retry: config
                .default_retry
                .map(|r| RetryPolicy::attempts(r.max_attempts, r.backoff_ms))
                .unwrap_or_default(),
        };

        let mut tasks = TaskRegistry::new();
        for task in &config.tasks {
            tasks.register(TaskDefinition {
                name: task.name.clone(),
                title: task.title.clone().unwrap_or_else(|| task.name.clone()),
                capability: task.agent.clone(),
                input_contract: task.input.clone(),
                output_contract: task.output.clone(),
                io: task.io.clone(),
                timeout_secs: task.timeout_secs,
            })?;
        }

        let mut phases = HashMap::new();
        let mut declared_order = Vec::with_capacity(config.phases.len());
        for phase_config in &config.phases {
            let phase = Phase::from_config(phase_config, &tasks, &defaults)?;
            declared_order.push(phase.id.clone());
            phases.insert(phase.id.clone(), phase);
        }

        Ok(Process {
            id: config.process_id(),
            name: config.name.clone(),
            version: config.version.clone(),
            description: config.description.clone(),
            input_contract: config.inputs.clone(),
            tasks,
            outputs: config.outputs.clone(),
            max_phase_runs: config.max_phase_runs.unwrap_or(DEFAULT_MAX_PHASE_RUNS),
            phases,
            declared_order,
        })
    }

    /// Get a phase by ID
    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phases.get(id)
    }

    /// Phases in declared order
    pub fn phases(&self) -> impl Iterator<Item = &Phase> {
        self.declared_order.iter().filter_map(|id| self.phases.get(id))
    }

    pub fn len(&self) -> usize {
        self.declared_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared_order.is_empty()
    }

    /// The plan a fresh run starts with: declared order minus branch-only phases
    pub fn default_plan(&self) -> Vec<String> {
        self.phases()
            .filter(|phase| !phase.branch_only)
            .map(|phase| phase.id.clone())
            .collect()
    }
}
