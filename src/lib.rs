//! phaseflow - phase-based orchestration of agent-delegated, schema-validated processes

pub mod agent;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

use std::path::PathBuf;

// Re-export commonly used types
pub use agent::{
    AgentClientConfig, AgentError, AgentExecutor, AgentRequest, AgentResponse, AgentRouter,
    SubprocessAgent,
};
pub use core::config::ProcessConfig;
pub use core::{PipelineContext, PipelineRun, Process, RunFailure, RunResult, RunStatus};
pub use execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};

/// Platform data directory for run history and task payloads
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("phaseflow")
}
