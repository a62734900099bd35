//! Breakpoints - human checkpoints that suspend a run
//!
//! A breakpoint moves through `Created -> AwaitingResolution -> {Approved,
//! Rejected}`. Its context is a snapshot taken when it is created; it never
//! reads or writes the run afterwards.

use crate::core::artifact::Artifact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Declared on a phase: where and how to ask for review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointSpec {
    pub title: String,

    pub question: String,

    /// Summary fields shown to the reviewer (binding templates)
    #[serde(default)]
    pub summary: BTreeMap<String, Value>,

    /// Recovery phases to run instead of halting when rejected
    #[serde(default)]
    pub on_reject: Option<Vec<String>>,
}

/// Lifecycle state of a breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointState {
    Created,
    AwaitingResolution,
    Approved,
    Rejected,
}

/// Reviewer's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

/// External resolution signal for a breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub decision: Decision,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl Resolution {
    pub fn approve() -> Self {
        Self {
            decision: Decision::Approved,
            comments: None,
            resolved_by: None,
        }
    }

    pub fn reject(comments: impl Into<String>) -> Self {
        Self {
            decision: Decision::Rejected,
            comments: Some(comments.into()),
            resolved_by: None,
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn by(mut self, reviewer: impl Into<String>) -> Self {
        self.resolved_by = Some(reviewer.into());
        self
    }

    pub fn is_approved(&self) -> bool {
        self.decision == Decision::Approved
    }
}

/// Snapshot shown to the reviewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointContext {
    pub run_id: Uuid,
    pub files: Vec<Artifact>,
    pub summary: Map<String, Value>,
}

/// Boundary payload toward a human-review surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointPayload {
    pub question: String,
    pub title: String,
    pub context: BreakpointContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakpointError {
    #[error("breakpoint {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: Uuid,
        from: BreakpointState,
        to: BreakpointState,
    },

    #[error("resolution targets breakpoint {given} but the run awaits {expected}")]
    WrongBreakpoint { expected: Uuid, given: Uuid },
}

/// A suspension record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: Uuid,
    pub phase_id: String,
    pub phase_index: usize,
    pub question: String,
    pub title: String,
    pub context: BreakpointContext,
    pub state: BreakpointState,
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
}

impl Breakpoint {
    /// Deterministic identity: a replayed phase raises the same breakpoint
    pub fn derive_id(run_id: Uuid, phase_index: usize, phase_id: &str) -> Uuid {
        Uuid::new_v5(&run_id, format!("breakpoint:{}:{}", phase_index, phase_id).as_bytes())
    }

    pub fn new(
        spec: &BreakpointSpec,
        phase_id: &str,
        phase_index: usize,
        context: BreakpointContext,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::derive_id(context.run_id, phase_index, phase_id),
            phase_id: phase_id.to_string(),
            phase_index,
            question: spec.question.clone(),
            title: spec.title.clone(),
            context,
            state: BreakpointState::Created,
            resolution: None,
            created_at,
        }
    }

    /// `Created -> AwaitingResolution`
    pub fn await_resolution(&mut self) -> Result<(), BreakpointError> {
        self.transition(BreakpointState::Created, BreakpointState::AwaitingResolution)
    }

    /// `AwaitingResolution -> Approved | Rejected`
    pub fn resolve(&mut self, resolution: Resolution) -> Result<(), BreakpointError> {
        let target = match resolution.decision {
            Decision::Approved => BreakpointState::Approved,
            Decision::Rejected => BreakpointState::Rejected,
        };
        self.transition(BreakpointState::AwaitingResolution, target)?;
        self.resolution = Some(resolution);
        Ok(())
    }

    fn transition(
        &mut self,
        expected: BreakpointState,
        to: BreakpointState,
    ) -> Result<(), BreakpointError> {
        if self.state != expected {
            return Err(BreakpointError::InvalidTransition {
                id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, BreakpointState::Approved | BreakpointState::Rejected)
    }

    pub fn payload(&self) -> BreakpointPayload {
        BreakpointPayload {
            question: self.question.clone(),
            title: self.title.clone(),
            context: self.context.clone(),
        }
    }

    /// Convert a resolved breakpoint into its permanent trace entry
    pub fn into_trace(self, resolved_at: DateTime<Utc>) -> Option<BreakpointTrace> {
        let resolution = self.resolution.clone()?;
        Some(BreakpointTrace {
            id: self.id,
            payload: self.payload(),
            resolution,
            created_at: self.created_at,
            resolved_at,
        })
    }
}

/// Resolved breakpoint as kept in the phase history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointTrace {
    pub id: Uuid,
    pub payload: BreakpointPayload,
    pub resolution: Resolution,
    pub created_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
}
