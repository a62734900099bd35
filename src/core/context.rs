//! Pipeline context - the values a phase's bindings can see

use crate::core::{
    binding::{self, BindingError, BindingScope},
    run::PipelineRun,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Snapshot of a run's inputs and completed phase outputs
///
/// Taken before a phase (or batch) starts, so every phase in the batch
/// observes the same validated outputs.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    /// Process inputs
    pub inputs: Value,

    /// Outputs of completed phases (phase_id -> output)
    pub phase_outputs: BTreeMap<String, Value>,
}

impl PipelineContext {
    pub fn new(inputs: Value) -> Self {
        Self {
            inputs,
            phase_outputs: BTreeMap::new(),
        }
    }

    /// Capture the current state of a run
    pub fn from_run(run: &PipelineRun) -> Self {
        Self {
            inputs: run.inputs.clone(),
            phase_outputs: run.phase_outputs.clone(),
        }
    }

    /// Set the output of a phase
    pub fn set_phase_output(&mut self, phase_id: &str, output: Value) {
        self.phase_outputs.insert(phase_id.to_string(), output);
    }

    pub fn phase_output(&self, phase_id: &str) -> Option<&Value> {
        self.phase_outputs.get(phase_id)
    }

    fn scope<'a>(&'a self, item: Option<&'a Value>) -> BindingScope<'a> {
        BindingScope {
            inputs: &self.inputs,
            phases: &self.phase_outputs,
            item,
        }
    }

    /// Resolve a template outside any fan-out
    pub fn resolve(&self, template: &Value) -> Result<Value, BindingError> {
        binding::resolve(template, &self.scope(None))
    }

    /// Resolve a template for one fan-out element
    pub fn resolve_for_item(&self, template: &Value, item: &Value) -> Result<Value, BindingError> {
        binding::resolve(template, &self.scope(Some(item)))
    }

    /// Resolve a map of named templates (breakpoint summaries, run outputs)
    pub fn resolve_named<'t, I>(&self, templates: I) -> Result<Map<String, Value>, BindingError>
    where
        I: IntoIterator<Item = (&'t String, &'t Value)>,
    {
        templates
            .into_iter()
            .map(|(name, template)| Ok((name.clone(), self.resolve(template)?)))
            .collect()
    }
}
