//! Task definitions, the task registry and invocation records

use crate::core::schema::Contract;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Namespace for effect identities
const EFFECT_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_9a1e_3b7d_4e21_8c6a_d4f2_19b0_7e53);

/// Placeholder substituted in I/O address templates
pub const EFFECT_ID_PLACEHOLDER: &str = "{effectId}";

/// Where an invocation's payloads live, relative to the run's storage root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoAddressing {
    #[serde(default = "default_input_template")]
    pub input: String,

    #[serde(default = "default_output_template")]
    pub output: String,
}

fn default_input_template() -> String {
    format!("tasks/{}/input.json", EFFECT_ID_PLACEHOLDER)
}

fn default_output_template() -> String {
    format!("tasks/{}/result.json", EFFECT_ID_PLACEHOLDER)
}

impl Default for IoAddressing {
    fn default() -> Self {
        Self {
            input: default_input_template(),
            output: default_output_template(),
        }
    }
}

impl IoAddressing {
    pub fn input_location(&self, effect_id: EffectId) -> String {
        self.input.replace(EFFECT_ID_PLACEHOLDER, &effect_id.to_string())
    }

    pub fn output_location(&self, effect_id: EffectId) -> String {
        self.output.replace(EFFECT_ID_PLACEHOLDER, &effect_id.to_string())
    }

    /// Templates must name the effect so two invocations never share a location
    pub fn check(&self) -> Result<()> {
        for template in [&self.input, &self.output] {
            if !template.contains(EFFECT_ID_PLACEHOLDER) {
                anyhow::bail!(
                    "I/O template '{}' must contain {}",
                    template,
                    EFFECT_ID_PLACEHOLDER
                );
            }
            if template.starts_with('/') || template.split('/').any(|part| part == "..") {
                anyhow::bail!("I/O template '{}' must be a relative path inside the run", template);
            }
        }
        if self.input == self.output {
            anyhow::bail!("input and output templates must differ");
        }
        Ok(())
    }
}

/// Immutable description of a delegated unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinition {
    /// Registry key
    pub name: String,

    /// Human title
    pub title: String,

    /// What kind of worker may execute this task
    pub capability: String,

    pub input_contract: Contract,

    pub output_contract: Contract,

    pub io: IoAddressing,

    /// Per-task delegation timeout (falls back to the process default)
    pub timeout_secs: Option<u64>,
}

/// Stable key -> definition map, resolved when a process is built
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<TaskDefinition>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition; names are unique
    pub fn register(&mut self, definition: TaskDefinition) -> Result<Arc<TaskDefinition>> {
        if self.tasks.contains_key(&definition.name) {
            anyhow::bail!("Duplicate task name: {}", definition.name);
        }
        definition.io.check()?;
        let definition = Arc::new(definition);
        self.tasks.insert(definition.name.clone(), definition.clone());
        Ok(definition)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TaskDefinition>> {
        self.tasks.get(name)
    }

    /// Look up a task, failing fast on unknown keys
    pub fn resolve(&self, name: &str) -> Result<Arc<TaskDefinition>> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown task '{}'", name))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

/// Identity of one invocation, derived from its position in the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(Uuid);

impl EffectId {
    /// Deterministic over `(run, phase index, task, disambiguator)`
    pub fn derive(run_id: Uuid, phase_index: usize, task: &str, disambiguator: usize) -> Self {
        let name = format!("{}:{}:{}:{}", run_id, phase_index, task, disambiguator);
        EffectId(Uuid::new_v5(&EFFECT_NAMESPACE, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

/// One execution attempt of a task with concrete input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub effect_id: EffectId,
    pub task: String,
    pub phase_index: usize,
    pub input: Value,
    pub status: InvocationStatus,
    pub result: Option<Value>,
    /// Delegation attempts made for this effect
    pub attempts: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Invocation {
    pub fn pending(effect_id: EffectId, task: &str, phase_index: usize, input: Value) -> Self {
        Self {
            effect_id,
            task: task.to_string(),
            phase_index,
            input,
            status: InvocationStatus::Pending,
            result: None,
            attempts: 0,
            error: None,
            started_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn succeed(&mut self, result: Value) {
        self.status = InvocationStatus::Succeeded;
        self.result = Some(result);
        self.error = None;
        self.resolved_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = InvocationStatus::Failed;
        self.error = Some(error.into());
        self.resolved_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = InvocationStatus::Cancelled;
        self.error = Some("cancelled".to_string());
        self.resolved_at = Some(Utc::now());
    }

    pub fn is_resolved(&self) -> bool {
        self.status != InvocationStatus::Pending
    }

    /// The validated output, present only on success
    pub fn output(&self) -> Option<&Value> {
        match self.status {
            InvocationStatus::Succeeded => self.result.as_ref(),
            _ => None,
        }
    }
}
