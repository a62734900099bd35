//! Pipeline runs, their phase history and the user-visible result

use crate::core::{
    artifact::{Artifact, ArtifactManifest},
    breakpoint::{Breakpoint, BreakpointTrace},
    gate::GateDecision,
    state::{PhaseStatus, RunStatus},
    task::EffectId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use uuid::Uuid;

/// Classification of a terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunErrorKind {
    InvalidInput,
    SchemaError,
    DelegationFailed,
    GateHalt,
    BreakpointRejected,
    Cancelled,
}

impl RunErrorKind {
    /// Stable code used when nothing more specific is known
    pub fn default_code(&self) -> &'static str {
        match self {
            RunErrorKind::InvalidInput => "INVALID_INPUT",
            RunErrorKind::SchemaError => "SCHEMA_ERROR",
            RunErrorKind::DelegationFailed => "DELEGATION_FAILED",
            RunErrorKind::GateHalt => "QUALITY_GATE_FAILED",
            RunErrorKind::BreakpointRejected => "BREAKPOINT_REJECTED",
            RunErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why a run ended without success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub kind: RunErrorKind,

    /// Stable machine-readable code
    pub code: String,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_id: Option<EffectId>,

    /// Offending field path or binding reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl RunFailure {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code().to_string(),
            message: message.into(),
            phase: None,
            effect_id: None,
            field: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn in_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_effect(mut self, effect_id: EffectId) -> Self {
        self.effect_id = Some(effect_id);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(phase) = &self.phase {
            write!(f, " (phase '{}')", phase)?;
        }
        Ok(())
    }
}

/// One executed phase as kept in the run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase_id: String,

    /// Position in the run's execution sequence
    pub phase_index: usize,

    pub status: PhaseStatus,

    /// Resolved input (an array of inputs for fan-out phases)
    pub input: Value,

    /// Validated output, absent when the invocation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    pub effect_ids: Vec<EffectId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateDecision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<BreakpointTrace>,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,
}

/// A single execution of a process
///
/// Holds everything needed to resume: the remaining plan, named phase
/// outputs and the pending breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,

    pub process_id: String,

    pub inputs: Value,

    pub status: RunStatus,

    /// Phases still to execute, front first
    pub plan: VecDeque<String>,

    /// Latest validated output of every completed phase
    pub phase_outputs: BTreeMap<String, Value>,

    pub history: Vec<PhaseRecord>,

    pub artifacts: ArtifactManifest,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_breakpoint: Option<Breakpoint>,

    /// Declared outputs, filled on completion
    #[serde(default)]
    pub outputs: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Create a new run with a random id
    pub fn new(
        process_id: impl Into<String>,
        inputs: Value,
        plan: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), process_id, inputs, plan, started_at)
    }

    pub fn with_id(
        run_id: Uuid,
        process_id: impl Into<String>,
        inputs: Value,
        plan: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            process_id: process_id.into(),
            inputs,
            status: RunStatus::NotStarted,
            plan: plan.into(),
            phase_outputs: BTreeMap::new(),
            history: Vec::new(),
            artifacts: ArtifactManifest::new(),
            pending_breakpoint: None,
            outputs: Map::new(),
            failure: None,
            started_at,
            finished_at: None,
        }
    }

    /// Index the next phase execution will get
    pub fn next_phase_index(&self) -> usize {
        self.history.len()
    }

    /// Append a phase result: history, named output and artifacts
    pub fn record_phase(&mut self, record: PhaseRecord) {
        if let Some(output) = &record.output {
            self.phase_outputs
                .insert(record.phase_id.clone(), output.clone());
        }
        self.artifacts.merge(record.artifacts.iter().cloned());
        self.history.push(record);
    }

    /// Replace the remaining plan (gate or breakpoint branch)
    pub fn replace_plan(&mut self, phases: Vec<String>) {
        self.plan = phases.into();
    }

    pub fn suspend(&mut self, breakpoint: Breakpoint) {
        self.status = RunStatus::AwaitingBreakpoint;
        self.pending_breakpoint = Some(breakpoint);
    }

    pub fn complete(&mut self, outputs: Map<String, Value>, at: DateTime<Utc>) {
        self.status = RunStatus::Completed;
        self.outputs = outputs;
        self.failure = None;
        self.finished_at = Some(at);
    }

    pub fn halt(&mut self, failure: RunFailure, at: DateTime<Utc>) {
        self.status = if failure.kind == RunErrorKind::Cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Halted
        };
        self.failure = Some(failure);
        self.finished_at = Some(at);
    }

    pub fn success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn last_record(&self) -> Option<&PhaseRecord> {
        self.history.last()
    }

    /// Records of a phase in execution order (branch loops run a phase more than once)
    pub fn records_for<'a>(&'a self, phase_id: &'a str) -> impl Iterator<Item = &'a PhaseRecord> {
        self.history.iter().filter(move |r| r.phase_id == phase_id)
    }

    /// Elapsed seconds, up to `now` while the run is not finished
    pub fn duration_secs(&self, now: DateTime<Utc>) -> f64 {
        let end = self.finished_at.unwrap_or(now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Build the user-visible result
    pub fn to_result(&self, now: DateTime<Utc>) -> RunResult {
        RunResult {
            success: self.success(),
            status: self.status,
            outputs: self.outputs.clone(),
            artifacts: self.artifacts.to_vec(),
            duration: self.duration_secs(now),
            metadata: RunMetadata {
                process_id: self.process_id.clone(),
                run_id: self.run_id,
                timestamp: self.finished_at.unwrap_or(now),
                breakpoint_id: self.pending_breakpoint.as_ref().map(|b| b.id),
            },
            error: self.failure.clone(),
        }
    }
}

/// Keys of [`RunResult`] that declared outputs may not shadow
pub const RESERVED_RESULT_FIELDS: &[&str] =
    &["success", "status", "artifacts", "duration", "metadata", "error"];

/// Run result as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,

    pub status: RunStatus,

    /// Declared outputs, flattened into the result
    #[serde(flatten)]
    pub outputs: Map<String, Value>,

    pub artifacts: Vec<Artifact>,

    /// Elapsed seconds
    pub duration: f64,

    pub metadata: RunMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub process_id: String,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoint_id: Option<Uuid>,
}
