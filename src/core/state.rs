//! Execution state models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall run status
///
/// `NotStarted -> Running -> {Completed, Halted, AwaitingBreakpoint, Cancelled}`;
/// `AwaitingBreakpoint` returns to `Running` on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run has not started
    NotStarted,
    /// Run is executing phases
    Running,
    /// Run is suspended on a breakpoint
    AwaitingBreakpoint,
    /// Every planned phase completed
    Completed,
    /// A phase failed, a gate halted or a breakpoint was rejected
    Halted,
    /// Run was cancelled
    Cancelled,
}

impl RunStatus {
    /// Check if the run can no longer make progress
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Halted | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running => "running",
            RunStatus::AwaitingBreakpoint => "awaiting_breakpoint",
            RunStatus::Completed => "completed",
            RunStatus::Halted => "halted",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(RunStatus::NotStarted),
            "running" => Some(RunStatus::Running),
            "awaiting_breakpoint" => Some(RunStatus::AwaitingBreakpoint),
            "completed" => Some(RunStatus::Completed),
            "halted" => Some(RunStatus::Halted),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single phase execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Output validated and accepted
    Completed,
    /// Output validated, gate redirected the plan
    Branched,
    /// Output validated, waiting on a breakpoint
    AwaitingBreakpoint,
    /// Invocation failed, gate halted or breakpoint rejected
    Halted,
    /// Run was cancelled while the phase was in flight
    Cancelled,
}
